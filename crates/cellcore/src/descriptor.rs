//! Cell-type descriptors: the runtime representation of a declared format
//! (design note §9 "Runtime type specialisation"). A descriptor is a small
//! value, not a Rust type — `Array[T, n]`, `Bits[k]`, `.default(v)` and
//! `.fixed(v)` all return a new descriptor with the relevant field set, so
//! schemas compose cell types at runtime rather than through generics.

use std::rc::Rc;

use crate::enum_table::EnumTable;
use crate::error::{CellError, Result};
use crate::rules::Rule;
use crate::value::Work;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
    /// No ancestor declares one yet; leaves default to little-endian wire
    /// order once forced to pick, matching the reference schemas.
    HostNeutral,
}

impl Default for Endian {
    fn default() -> Self {
        Endian::HostNeutral
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeafKind {
    /// Fixed-width integer; width in bytes, one of 1/2/4/8.
    Int { width: u8 },
    /// Integer whose width is inherited from an ancestor's `ptrsize`.
    Pointer,
    /// Sub-byte bitfield; width in bits, 1..=16 (spans at most two bytes for
    /// widths <= 8; wider fields are modelled as multi-byte bit runs).
    Bits { width: u8 },
    /// A single byte, represented as its character glyph.
    Char,
    /// Arbitrary byte run. `len = Some(n)` for a declared fixed length;
    /// `None` means "consume whatever the enclosing container's remaining
    /// budget offers" (a wrap's fallback, a varwrap's raw-fallback state).
    Raw { len: Option<usize> },
}

pub type OffsetFn = Rc<dyn Fn(&crate::cell::Cell) -> Result<crate::offset::Offset>>;

/// A schema-declared dynamic default: recomputed from the cell's ancestors
/// and siblings every time an undefined leaf is read (checksums, lengths,
/// "source defaults to destination"-style fields). Distinct from the
/// static `default`/`fixed` specialisations, which hold one fixed `Work`.
/// Not part of the distilled spec's rule grammar — equality rules can't
/// express "the one's-complement checksum of my siblings" — but present
/// throughout the original schemas (`IPchecksum.work`, `IPlen.work`,
/// `IPihl._default`), so schema crates get an escape hatch for it.
pub type ComputedFn = Rc<dyn Fn(&crate::cell::Cell) -> Result<crate::value::Work>>;

#[derive(Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: CellType,
    /// `None` for an unqualified (struct-like) record: offsets are computed
    /// cumulatively. `Some` for an annotated record with explicit offsets.
    pub offset: Option<OffsetFn>,
}

impl std::fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("offset", &self.offset.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum Kind {
    Leaf(LeafKind),
    Record(Vec<FieldDef>),
    Array { element: CellType, count: usize },
    Wrap { options: Vec<CellType>, fallback: CellType },
    VarWrap { element: CellType },
}

#[derive(Clone)]
pub struct CellTypeInner {
    pub kind: Kind,
    pub default: Option<Work>,
    pub fixed: Option<Work>,
    pub computed: Option<ComputedFn>,
    pub enum_table: Option<EnumTable>,
    pub endian: Option<Endian>,
    pub ptrsize: Option<u8>,
    pub rules: Vec<Rule>,
    /// Name used in diagnostics (`show`, error messages); purely cosmetic.
    pub label: Option<&'static str>,
}

impl std::fmt::Debug for CellTypeInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellTypeInner")
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("fixed", &self.fixed)
            .field("computed", &self.computed.as_ref().map(|_| "<fn>"))
            .field("enum_table", &self.enum_table)
            .field("endian", &self.endian)
            .field("ptrsize", &self.ptrsize)
            .field("rules", &self.rules)
            .field("label", &self.label)
            .finish()
    }
}

/// A cell-type descriptor: cheap to clone (an `Rc`), compared by identity
/// nowhere — specialisations always produce a fresh value.
#[derive(Clone, Debug)]
pub struct CellType(pub(crate) Rc<CellTypeInner>);

impl CellType {
    fn from_kind(kind: Kind) -> Self {
        CellType(Rc::new(CellTypeInner {
            kind,
            default: None,
            fixed: None,
            computed: None,
            enum_table: None,
            endian: None,
            ptrsize: None,
            rules: Vec::new(),
            label: None,
        }))
    }

    pub fn int(width: u8) -> Result<Self> {
        if ![1, 2, 4, 8].contains(&width) {
            return Err(CellError::Definition(format!(
                "integer leaf width must be 1, 2, 4 or 8 bytes, got {width}"
            )));
        }
        Ok(Self::from_kind(Kind::Leaf(LeafKind::Int { width })))
    }

    pub fn pointer() -> Self {
        Self::from_kind(Kind::Leaf(LeafKind::Pointer))
    }

    pub fn bits(width: u8) -> Result<Self> {
        if width == 0 || width > 16 {
            return Err(CellError::Definition(format!(
                "bit-field width must be in 1..=16, got {width}"
            )));
        }
        Ok(Self::from_kind(Kind::Leaf(LeafKind::Bits { width })))
    }

    pub fn char_leaf() -> Self {
        Self::from_kind(Kind::Leaf(LeafKind::Char))
    }

    pub fn raw() -> Self {
        Self::from_kind(Kind::Leaf(LeafKind::Raw { len: None }))
    }

    pub fn raw_n(len: usize) -> Self {
        Self::from_kind(Kind::Leaf(LeafKind::Raw { len: Some(len) }))
    }

    pub fn record(fields: Vec<FieldDef>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for f in &fields {
            if !seen.insert(f.name.clone()) {
                return Err(CellError::Definition(format!(
                    "duplicate field name {:?}",
                    f.name
                )));
            }
        }
        Ok(Self::from_kind(Kind::Record(fields)))
    }

    pub fn array(element: CellType, count: usize) -> Self {
        Self::from_kind(Kind::Array { element, count })
    }

    /// A string is an array of single-byte characters.
    pub fn string(len: usize) -> Self {
        Self::array(Self::char_leaf(), len)
    }

    pub fn wrap(options: Vec<CellType>, fallback: CellType) -> Self {
        Self::from_kind(Kind::Wrap { options, fallback })
    }

    pub fn varwrap(element: CellType) -> Self {
        Self::from_kind(Kind::VarWrap { element })
    }

    fn specialise(&self, f: impl FnOnce(&mut CellTypeInner)) -> Self {
        let mut inner = (*self.0).clone();
        f(&mut inner);
        CellType(Rc::new(inner))
    }

    pub fn default_value(&self, v: Work) -> Self {
        self.specialise(|inner| inner.default = Some(v))
    }

    pub fn fixed(&self, v: Work) -> Self {
        self.specialise(|inner| inner.fixed = Some(v))
    }

    /// Attach a dynamic default: recomputed from the cell's tree every time
    /// an undefined leaf of this type is read. Only meaningful on leaves.
    pub fn computed(&self, f: ComputedFn) -> Result<Self> {
        match &self.0.kind {
            Kind::Leaf(_) => Ok(self.specialise(|inner| inner.computed = Some(f))),
            _ => Err(CellError::Definition(
                "computed default specialisation requires a leaf".into(),
            )),
        }
    }

    pub fn with_enum(&self, table: EnumTable) -> Result<Self> {
        match &self.0.kind {
            Kind::Leaf(LeafKind::Int { .. } | LeafKind::Bits { .. } | LeafKind::Pointer) => {
                Ok(self.specialise(|inner| inner.enum_table = Some(table)))
            }
            _ => Err(CellError::Definition(
                "enum specialisation requires a numeric leaf".into(),
            )),
        }
    }

    pub fn endian(&self, e: Endian) -> Self {
        self.specialise(|inner| inner.endian = Some(e))
    }

    pub fn ptrsize(&self, n: u8) -> Result<Self> {
        if n != 32 && n != 64 {
            return Err(CellError::Definition(format!(
                "pointer width must be 32 or 64, got {n}"
            )));
        }
        Ok(self.specialise(|inner| inner.ptrsize = Some(n)))
    }

    pub fn with_rules(&self, rules: Vec<Rule>) -> Self {
        self.specialise(|inner| inner.rules = rules)
    }

    pub fn labelled(&self, label: &'static str) -> Self {
        self.specialise(|inner| inner.label = Some(label))
    }

    pub fn kind(&self) -> &Kind {
        &self.0.kind
    }

    pub fn default(&self) -> Option<&Work> {
        self.0.default.as_ref()
    }

    pub fn fixed_value(&self) -> Option<&Work> {
        self.0.fixed.as_ref()
    }

    pub fn computed_fn(&self) -> Option<&ComputedFn> {
        self.0.computed.as_ref()
    }

    pub fn enum_table(&self) -> Option<&EnumTable> {
        self.0.enum_table.as_ref()
    }

    pub fn declared_endian(&self) -> Option<Endian> {
        self.0.endian
    }

    pub fn declared_ptrsize(&self) -> Option<u8> {
        self.0.ptrsize
    }

    pub fn rules(&self) -> &[Rule] {
        &self.0.rules
    }

    pub fn label(&self) -> Option<&'static str> {
        self.0.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_rejects_unsupported_widths() {
        assert!(CellType::int(3).is_err());
        for w in [1, 2, 4, 8] {
            assert!(CellType::int(w).is_ok());
        }
    }

    #[test]
    fn bits_rejects_zero_and_over_sixteen() {
        assert!(CellType::bits(0).is_err());
        assert!(CellType::bits(17).is_err());
        assert!(CellType::bits(16).is_ok());
        assert!(CellType::bits(1).is_ok());
    }

    #[test]
    fn ptrsize_rejects_widths_other_than_32_or_64() {
        let ty = CellType::pointer();
        assert!(ty.ptrsize(16).is_err());
        assert!(ty.ptrsize(32).is_ok());
        assert!(ty.ptrsize(64).is_ok());
    }

    #[test]
    fn record_rejects_duplicate_field_names() {
        let dup = vec![
            FieldDef { name: "a".into(), ty: CellType::int(4).unwrap(), offset: None },
            FieldDef { name: "a".into(), ty: CellType::int(4).unwrap(), offset: None },
        ];
        let err = CellType::record(dup).unwrap_err();
        assert!(matches!(err, CellError::Definition(_)));
    }

    #[test]
    fn computed_specialisation_requires_a_leaf() {
        let record = CellType::record(vec![]).unwrap();
        assert!(record.computed(Rc::new(|_| Ok(Work::Int(0)))).is_err());
        let leaf = CellType::int(4).unwrap();
        assert!(leaf.computed(Rc::new(|_| Ok(Work::Int(0)))).is_ok());
    }

    #[test]
    fn enum_specialisation_requires_a_numeric_leaf() {
        let table = EnumTable::from_pairs([(0, "zero")]);
        let raw = CellType::raw();
        assert!(raw.with_enum(table.clone()).is_err());
        let int_leaf = CellType::int(1).unwrap();
        assert!(int_leaf.with_enum(table).is_ok());
    }

    #[test]
    fn specialisation_methods_do_not_mutate_the_original() {
        let base = CellType::int(4).unwrap();
        let with_default = base.default_value(Work::Int(7));
        assert!(base.default().is_none());
        assert_eq!(with_default.default(), Some(&Work::Int(7)));
    }

    #[test]
    fn string_builds_a_char_array_of_the_given_length() {
        let ty = CellType::string(3);
        match ty.kind() {
            Kind::Array { element, count } => {
                assert_eq!(*count, 3);
                assert!(matches!(element.kind(), Kind::Leaf(LeafKind::Char)));
            }
            _ => panic!("expected an array kind"),
        }
    }
}
