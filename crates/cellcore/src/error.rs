use thiserror::Error;

/// The single error family the core surfaces, per the fixed kind table:
/// class-level malformation, short parses, fixed-value violations, shape
/// mismatches, variable-array budget mismatches, unknown fields, and the two
/// `BinRepr` failure modes it wraps.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CellError {
    #[error("cell-definition: {0}")]
    Definition(String),

    #[error("unpack: not enough data at offset {offset} (need {needed}, have {available})")]
    UnpackShort {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("value-fixed: expected {expected}, got {got}")]
    ValueFixed { expected: String, got: String },

    #[error("value-type: {0}")]
    ValueType(String),

    #[error("length-mismatch: {0}")]
    LengthMismatch(String),

    #[error("unknown-field: {0}")]
    UnknownField(String),

    #[error("overlap at offset {0}")]
    Overlap(usize),

    #[error("padding-needed at offset {0}")]
    PaddingNeeded(usize),

    #[error("rule-violation: {0}")]
    RuleViolation(String),
}

impl From<binrepr::BinReprError> for CellError {
    fn from(e: binrepr::BinReprError) -> Self {
        match e {
            binrepr::BinReprError::Overlap(pos) => CellError::Overlap(pos),
            binrepr::BinReprError::PaddingNeeded(pos) => CellError::PaddingNeeded(pos),
        }
    }
}

pub type Result<T> = std::result::Result<T, CellError>;
