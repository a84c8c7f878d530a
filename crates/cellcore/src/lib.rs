//! `cellcore`: a declarative binary-format engine.
//!
//! A format is declared as a [`descriptor::CellType`] — a tree of leaf,
//! record, array, wrap and varwrap descriptors (§3.1) — and instantiated as
//! a [`cell::Cell`]. Every cell supports four views (§4.C.1): `work` (native
//! values), `repr` (human-friendly presentation), `pack`/`unpack` (bytes via
//! [`binrepr::BinRepr`]), and `show` (a labelled dump). Constraints between
//! sibling cells are declared as [`rules::Rule`]s and resolved on demand by
//! [`rules::RuleManager`] when an undefined leaf is read.
//!
//! This crate is the core only: concrete wire formats (ELF, firmware
//! tables, IP/TCP/UDP) are external collaborators built on top of it — see
//! the sibling `schemas` crate.

pub mod binding;
pub mod cell;
pub mod descriptor;
pub mod enum_table;
pub mod error;
pub mod leaf;
pub mod offset;
pub mod rules;
pub mod value;

pub use binding::BindingTable;
pub use cell::{Cell, Name};
pub use descriptor::{CellType, Endian, FieldDef, Kind, LeafKind};
pub use enum_table::EnumTable;
pub use error::{CellError, Result};
pub use offset::Offset;
pub use rules::{Path, Rule, RuleManager};
pub use value::{Repr, Work};
