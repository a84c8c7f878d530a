use crate::error::{CellError, Result};

/// The "work" view: a tree of native values, free of any presentational
/// concerns (enum names, dotted-quad addresses, ...).
#[derive(Clone, Debug, PartialEq)]
pub enum Work {
    Int(i128),
    Bytes(Vec<u8>),
    /// Field order preserved; a `Vec` rather than a map keeps declaration
    /// order stable for `show`/`unrepr` diagnostics without pulling in an
    /// ordered-map crate the rest of the stack doesn't otherwise need.
    Record(Vec<(String, Work)>),
    Array(Vec<Work>),
    Wrap(Box<Work>),
}

impl Work {
    pub fn as_int(&self) -> Result<i128> {
        match self {
            Work::Int(v) => Ok(*v),
            other => Err(CellError::ValueType(format!("expected integer, got {other:?}"))),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Work::Bytes(v) => Ok(v),
            other => Err(CellError::ValueType(format!("expected bytes, got {other:?}"))),
        }
    }

    pub fn as_record(&self) -> Result<&[(String, Work)]> {
        match self {
            Work::Record(v) => Ok(v),
            other => Err(CellError::ValueType(format!("expected record, got {other:?}"))),
        }
    }

    pub fn as_array(&self) -> Result<&[Work]> {
        match self {
            Work::Array(v) => Ok(v),
            other => Err(CellError::ValueType(format!("expected array, got {other:?}"))),
        }
    }

    pub fn as_wrap(&self) -> Result<&Work> {
        match self {
            Work::Wrap(v) => Ok(v),
            other => Err(CellError::ValueType(format!("expected wrapped value, got {other:?}"))),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Work> {
        self.as_record().ok()?.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// The "repr" view: human-friendly presentation (enum names, strings,
/// dotted-quad addresses).
#[derive(Clone, Debug, PartialEq)]
pub enum Repr {
    Num(i128),
    Text(String),
    Seq(Vec<Repr>),
    Map(Vec<(String, Repr)>),
    Bytes(Vec<u8>),
}

impl Repr {
    pub fn as_num(&self) -> Result<i128> {
        match self {
            Repr::Num(v) => Ok(*v),
            Repr::Text(s) => s
                .parse()
                .map_err(|_| CellError::ValueType(format!("not numeric: {s:?}"))),
            other => Err(CellError::ValueType(format!("expected number, got {other:?}"))),
        }
    }

    pub fn as_text(&self) -> Result<&str> {
        match self {
            Repr::Text(s) => Ok(s),
            other => Err(CellError::ValueType(format!("expected text, got {other:?}"))),
        }
    }

    pub fn as_seq(&self) -> Result<&[Repr]> {
        match self {
            Repr::Seq(v) => Ok(v),
            other => Err(CellError::ValueType(format!("expected sequence, got {other:?}"))),
        }
    }

    pub fn as_map(&self) -> Result<&[(String, Repr)]> {
        match self {
            Repr::Map(v) => Ok(v),
            other => Err(CellError::ValueType(format!("expected mapping, got {other:?}"))),
        }
    }
}
