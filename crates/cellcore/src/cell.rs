//! The cell tree (§3.1, §4.C): a dynamic composition of self-describing
//! nodes, each able to parse, pack, and present itself in four views.
//!
//! Parent links are `Weak`, so a subcell never keeps its parent alive —
//! ownership flows strictly root-to-leaf through `Rc`. This is the design
//! notes' "arena of cells" goal reached without index bookkeeping: `Rc`'s
//! pointer identity stands in for a stable arena index wherever one is
//! needed (rule-manager component grouping, `path()`).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use binrepr::BinRepr;

use crate::descriptor::{CellType, Endian, Kind, LeafKind};
use crate::error::{CellError, Result};
use crate::leaf;
use crate::offset::Offset;
use crate::rules::{self, RuleManager};
use crate::value::{Repr, Work};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Name {
    Field(String),
    Index(usize),
}

impl Name {
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Name::Field(s) => Some(s),
            Name::Index(_) => None,
        }
    }

    fn display(&self) -> String {
        match self {
            Name::Field(s) => s.clone(),
            Name::Index(i) => i.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WrapSelection {
    Option(usize),
    Fallback,
}

struct VarWrapData {
    element_ty: CellType,
    elements: Option<Vec<Cell>>,
    count_cell: Cell,
    packlen_cell: Cell,
    raw_fallback: Option<Vec<u8>>,
}

enum Content {
    Leaf(Option<Work>),
    Record(Vec<Cell>),
    Array(Vec<Cell>),
    Wrap {
        selection: Option<WrapSelection>,
        child: Option<Cell>,
    },
    VarWrap(VarWrapData),
}

struct CellNode {
    parent: Option<Weak<RefCell<CellNode>>>,
    name: Option<Name>,
    ty: CellType,
    content: Content,
    defined: bool,
    /// Bytes this cell's parse consumed from an ancestor's remaining budget
    /// but did not itself understand (a wrap's unmatched fallback region, a
    /// varwrap's raw-fallback state) kept for `pack_with_holes`.
    tail: Option<(usize, Vec<u8>)>,
}

/// A node in the cell tree. Cheap to clone — clones share the same
/// underlying node.
#[derive(Clone)]
pub struct Cell(Rc<RefCell<CellNode>>);

impl Cell {
    /// Build an empty, fully wired instance: defaults available, nothing
    /// defined yet.
    pub fn empty(ty: CellType) -> Self {
        let content = match ty.kind().clone() {
            Kind::Leaf(_) => Content::Leaf(None),
            Kind::Record(_) => Content::Record(Vec::new()),
            Kind::Array { .. } => Content::Array(Vec::new()),
            Kind::Wrap { .. } => Content::Wrap {
                selection: None,
                child: None,
            },
            Kind::VarWrap { element } => Content::VarWrap(VarWrapData {
                element_ty: element,
                elements: None,
                count_cell: Cell::leaf_placeholder(),
                packlen_cell: Cell::leaf_placeholder(),
                raw_fallback: None,
            }),
        };
        let cell = Cell(Rc::new(RefCell::new(CellNode {
            parent: None,
            name: None,
            ty: ty.clone(),
            content,
            defined: false,
            tail: None,
        })));

        match ty.kind() {
            Kind::Record(fields) => {
                let children: Vec<Cell> = fields
                    .iter()
                    .map(|f| {
                        let c = Cell::empty(f.ty.clone());
                        c.attach(&cell, Name::Field(f.name.clone()));
                        c
                    })
                    .collect();
                cell.0.borrow_mut().content = Content::Record(children);
            }
            Kind::Array { element, count } => {
                let children: Vec<Cell> = (0..*count)
                    .map(|i| {
                        let c = Cell::empty(element.clone());
                        c.attach(&cell, Name::Index(i));
                        c
                    })
                    .collect();
                cell.0.borrow_mut().content = Content::Array(children);
            }
            Kind::VarWrap { .. } => {
                let count_cell = Cell::empty(CellType::int(4).unwrap_or_else(|_| CellType::int(1).unwrap()));
                count_cell.attach(&cell, Name::Field("count".into()));
                let packlen_cell = Cell::empty(CellType::int(4).unwrap_or_else(|_| CellType::int(1).unwrap()));
                packlen_cell.attach(&cell, Name::Field("packlen".into()));
                if let Content::VarWrap(data) = &mut cell.0.borrow_mut().content {
                    data.count_cell = count_cell;
                    data.packlen_cell = packlen_cell;
                }
            }
            _ => {}
        }
        cell
    }

    /// A throwaway leaf used only to satisfy struct field initialisation
    /// before the real (parent-linked) count/packlen cells are built.
    fn leaf_placeholder() -> Cell {
        Cell(Rc::new(RefCell::new(CellNode {
            parent: None,
            name: None,
            ty: CellType::int(1).expect("width 1 valid"),
            content: Content::Leaf(None),
            defined: false,
            tail: None,
        })))
    }

    fn attach(&self, parent: &Cell, name: Name) {
        let mut node = self.0.borrow_mut();
        node.parent = Some(Rc::downgrade(&parent.0));
        node.name = Some(name);
    }

    pub fn parent(&self) -> Option<Cell> {
        self.0.borrow().parent.as_ref().and_then(Weak::upgrade).map(Cell)
    }

    pub fn name(&self) -> Option<Name> {
        self.0.borrow().name.clone()
    }

    pub fn ty(&self) -> CellType {
        self.0.borrow().ty.clone()
    }

    /// Identity used by the rule engine to group leaves into components and
    /// by `path()`/diagnostics; stable for the node's lifetime.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn isdef(&self) -> bool {
        self.0.borrow().defined
    }

    fn mark_defined(&self) {
        self.0.borrow_mut().defined = true;
    }

    /// Direct named/indexed subcells, in declaration order.
    pub fn children(&self) -> Vec<Cell> {
        let node = self.0.borrow();
        match &node.content {
            Content::Leaf(_) => Vec::new(),
            Content::Record(cs) | Content::Array(cs) => cs.clone(),
            Content::Wrap { child, .. } => child.iter().cloned().collect(),
            Content::VarWrap(d) => {
                let mut v = vec![d.count_cell.clone(), d.packlen_cell.clone()];
                if let Some(els) = &d.elements {
                    v.extend(els.iter().cloned());
                }
                v
            }
        }
    }

    pub fn child_named(&self, name: &str) -> Option<Cell> {
        let node = self.0.borrow();
        match &node.content {
            Content::Record(cs) => cs
                .iter()
                .find(|c| c.name().and_then(|n| n.as_field().map(str::to_owned)) == Some(name.to_string()))
                .cloned(),
            Content::Array(cs) => name.parse::<usize>().ok().and_then(|i| cs.get(i).cloned()),
            Content::Wrap { child, .. } => child.clone().filter(|_| name == "value"),
            Content::VarWrap(d) => match name {
                "count" => Some(d.count_cell.clone()),
                "packlen" => Some(d.packlen_cell.clone()),
                _ => name
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| d.elements.as_ref().and_then(|e| e.get(i).cloned())),
            },
            Content::Leaf(_) => None,
        }
    }

    /// Absolute dotted path from the tree's root to this cell.
    pub fn absolute_path(&self) -> String {
        let mut segs = Vec::new();
        let mut cur = self.clone();
        loop {
            let name = cur.0.borrow().name.clone();
            match name {
                Some(n) => segs.push(n.display()),
                None => break,
            }
            match cur.parent() {
                Some(p) => cur = p,
                None => break,
            }
        }
        segs.reverse();
        segs.join(".")
    }

    /// `(root, path_from_root)`.
    pub fn path(&self) -> (Cell, String) {
        let mut root = self.clone();
        while let Some(p) = root.parent() {
            root = p;
        }
        (root, self.absolute_path())
    }

    pub fn declared_rules(&self) -> Vec<crate::rules::Rule> {
        self.0.borrow().ty.rules().to_vec()
    }

    pub fn declared_default(&self) -> Option<Work> {
        self.0.borrow().ty.default().cloned()
    }

    /// The raw working value if this leaf (or composite) has explicit
    /// content, bypassing default/rule fallback — used by the rule engine
    /// itself to avoid infinite recursion.
    pub fn work_if_defined(&self) -> Option<Work> {
        if !self.isdef() {
            return None;
        }
        self.work()
    }

    // ---- ancestor-inherited context -----------------------------------

    fn effective_endian(&self) -> Endian {
        if let Some(e) = self.ty().declared_endian() {
            return e;
        }
        match self.parent() {
            Some(p) => p.effective_endian(),
            None => Endian::HostNeutral,
        }
    }

    fn effective_ptrsize(&self) -> u8 {
        if let Some(p) = self.ty().declared_ptrsize() {
            return p;
        }
        match self.parent() {
            Some(p) => p.effective_ptrsize(),
            None => 32,
        }
    }

    // ---- packlen --------------------------------------------------------

    pub fn packlen(&self) -> Offset {
        let ty = self.ty();
        match ty.kind() {
            Kind::Leaf(lk) => {
                if let Some(static_len) = leaf::leaf_static_len(lk, self.effective_ptrsize() / 8) {
                    return static_len;
                }
                // Raw with no declared length: whatever content is present.
                match self.0.borrow().content {
                    Content::Leaf(Some(Work::Bytes(ref b))) => Offset::from_bytes(b.len()),
                    _ => Offset::ZERO,
                }
            }
            Kind::Record(_) => {
                let n = self.children().len();
                let mut max = Offset::ZERO;
                for i in 0..n {
                    let off = self.field_offset(i).unwrap_or(Offset::ZERO);
                    let len = self.children()[i].packlen();
                    let end = off + len;
                    if end > max {
                        max = end;
                    }
                }
                max
            }
            Kind::Array { .. } => self
                .children()
                .iter()
                .fold(Offset::ZERO, |acc, c| acc + c.packlen()),
            Kind::Wrap { .. } => {
                let node = self.0.borrow();
                match &node.content {
                    Content::Wrap { child: Some(c), .. } => c.packlen(),
                    _ => Offset::ZERO,
                }
            }
            Kind::VarWrap { .. } => {
                let node = self.0.borrow();
                match &node.content {
                    Content::VarWrap(d) => {
                        if let Some(els) = &d.elements {
                            els.iter().fold(Offset::ZERO, |acc, c| acc + c.packlen())
                        } else if let Some(raw) = &d.raw_fallback {
                            Offset::from_bytes(raw.len())
                        } else {
                            Offset::ZERO
                        }
                    }
                    _ => Offset::ZERO,
                }
            }
        }
    }

    fn field_offset(&self, idx: usize) -> Result<Offset> {
        let ty = self.ty();
        let fields = match ty.kind() {
            Kind::Record(fs) => fs,
            _ => return Err(CellError::Definition("field_offset on non-record".into())),
        };
        match &fields[idx].offset {
            Some(f) => f(self),
            None => {
                let children = self.children();
                let mut acc = Offset::ZERO;
                for child in children.iter().take(idx) {
                    acc = acc + child.packlen();
                }
                Ok(acc)
            }
        }
    }

    // ---- work / unwork ----------------------------------------------------

    /// The working value: content if defined, else the declared default,
    /// else whatever the rule engine can impute. `None` if nothing applies.
    pub fn work(&self) -> Option<Work> {
        let ty = self.ty();
        match ty.kind() {
            Kind::Leaf(_) => {
                if let Content::Leaf(Some(v)) = &self.0.borrow().content {
                    return Some(v.clone());
                }
                if let Some(f) = ty.computed_fn() {
                    if let Ok(v) = f(self) {
                        return Some(v);
                    }
                }
                // Rules take priority over a static default: a leaf tied by
                // an `Equal` rule to a sibling that *is* defined must reflect
                // that sibling's value even when it also declares its own
                // default (spec.md S2: `len`'s default of 4 must yield to
                // `text.count == 2` once `text` is set).
                if let Some(v) = self.impute_via_rules() {
                    return Some(v);
                }
                ty.default().cloned()
            }
            Kind::Record(_) => {
                let mut out = Vec::new();
                for c in self.children() {
                    let name = c.name()?.display();
                    out.push((name, c.work()?));
                }
                Some(Work::Record(out))
            }
            Kind::Array { .. } => {
                let mut out = Vec::new();
                for c in self.children() {
                    out.push(c.work()?);
                }
                Some(Work::Array(out))
            }
            Kind::Wrap { .. } => {
                let child = match &self.0.borrow().content {
                    Content::Wrap { child, .. } => child.clone(),
                    _ => None,
                };
                Some(Work::Wrap(Box::new(child?.work()?)))
            }
            Kind::VarWrap { .. } => {
                let elements = match &self.0.borrow().content {
                    Content::VarWrap(d) => d.elements.clone(),
                    _ => None,
                };
                let mut out = Vec::new();
                for c in elements? {
                    out.push(c.work()?);
                }
                Some(Work::Array(out))
            }
        }
    }

    fn impute_via_rules(&self) -> Option<Work> {
        let (root, _) = self.path();
        let mgr = RuleManager::run(&root);
        mgr.imputed_for(self)
    }

    pub fn unwork(&self, v: Work) -> Result<()> {
        let ty = self.ty();
        if let Some(parent) = self.parent() {
            self.reject_varwrap_virtual_mutation(&parent)?;
        }
        match ty.kind() {
            Kind::Leaf(lk) => {
                self.check_fixed(&v)?;
                if matches!(lk, LeafKind::Char) {
                    v.as_int()?;
                } else {
                    v.as_int().map(drop).or_else(|_| v.as_bytes().map(drop))?;
                }
                self.0.borrow_mut().content = Content::Leaf(Some(v));
                self.mark_defined();
                Ok(())
            }
            Kind::Record(fields) => {
                let entries = v.as_record()?;
                for (name, _) in entries {
                    if !fields.iter().any(|f| &f.name == name) {
                        return Err(CellError::UnknownField(name.clone()));
                    }
                }
                for child in self.children() {
                    let fname = child.name().and_then(|n| n.as_field().map(str::to_owned));
                    if let Some(fname) = fname {
                        if let Some((_, val)) = entries.iter().find(|(n, _)| n == &fname) {
                            child.unwork(val.clone())?;
                        }
                    }
                }
                self.mark_defined();
                Ok(())
            }
            Kind::Array { element, count } => {
                let items = v.as_array()?;
                if items.len() != *count {
                    return Err(CellError::LengthMismatch(format!(
                        "expected {} elements, got {}",
                        count,
                        items.len()
                    )));
                }
                self.check_fixed_array(element, items)?;
                for (child, val) in self.children().iter().zip(items) {
                    child.unwork(val.clone())?;
                }
                self.mark_defined();
                Ok(())
            }
            Kind::Wrap { options, fallback } => {
                let inner = v.as_wrap().cloned().unwrap_or(v);
                for (i, opt) in options.iter().enumerate() {
                    let c = Cell::empty(opt.clone());
                    c.attach(self, Name::Field("value".into()));
                    if c.unwork(inner.clone()).is_ok() {
                        self.0.borrow_mut().content = Content::Wrap {
                            selection: Some(WrapSelection::Option(i)),
                            child: Some(c),
                        };
                        self.mark_defined();
                        return Ok(());
                    }
                }
                let c = Cell::empty(fallback.clone());
                c.attach(self, Name::Field("value".into()));
                c.unwork(inner)?;
                self.0.borrow_mut().content = Content::Wrap {
                    selection: Some(WrapSelection::Fallback),
                    child: Some(c),
                };
                self.mark_defined();
                Ok(())
            }
            Kind::VarWrap { element } => {
                let items = v.as_array()?;
                let mut els = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let c = Cell::empty(element.clone());
                    c.attach(self, Name::Index(i));
                    c.unwork(item.clone())?;
                    els.push(c);
                }
                let n = els.len();
                let total = els.iter().fold(Offset::ZERO, |acc, c| acc + c.packlen());
                if let Content::VarWrap(d) = &mut self.0.borrow_mut().content {
                    d.elements = Some(els);
                }
                self.count_cell_force(n as i128);
                self.packlen_cell_force(total.byte_ceil() as i128);
                self.mark_defined();
                Ok(())
            }
        }
    }

    fn reject_varwrap_virtual_mutation(&self, parent: &Cell) -> Result<()> {
        let is_count_or_packlen = matches!(
            self.name(),
            Some(Name::Field(ref f)) if f == "count" || f == "packlen"
        );
        if !is_count_or_packlen {
            return Ok(());
        }
        if matches!(parent.ty().kind(), Kind::VarWrap { .. }) {
            let defined = matches!(&parent.0.borrow().content, Content::VarWrap(d) if d.elements.is_some());
            if defined {
                return Err(CellError::ValueType(
                    "cannot mutate count/packlen on an already-defined variable array".into(),
                ));
            }
        }
        Ok(())
    }

    fn count_cell_force(&self, n: i128) {
        if let Content::VarWrap(d) = &self.0.borrow().content {
            d.count_cell.0.borrow_mut().content = Content::Leaf(Some(Work::Int(n)));
            d.count_cell.mark_defined();
        }
    }

    fn packlen_cell_force(&self, n: i128) {
        if let Content::VarWrap(d) = &self.0.borrow().content {
            d.packlen_cell.0.borrow_mut().content = Content::Leaf(Some(Work::Int(n)));
            d.packlen_cell.mark_defined();
        }
    }

    /// Select a wrap's option by its `labelled` name, bypassing trial-parse
    /// order. Returns the (empty) child cell for the caller to `unwork` /
    /// `unrepr` / `unpack_into`. Used by layered schemas where the
    /// discriminator lives in a sibling header field (§4.E bindings) rather
    /// than in the payload's own bytes, so trial order can't disambiguate.
    pub fn select_wrap(&self, option_label: &'static str) -> Result<Cell> {
        let ty = self.ty();
        let options = match ty.kind() {
            Kind::Wrap { options, .. } => options,
            _ => return Err(CellError::Definition("select_wrap on non-wrap cell".into())),
        };
        let idx = options
            .iter()
            .position(|o| o.label() == Some(option_label))
            .ok_or_else(|| {
                CellError::Definition(format!("no wrap option labelled {option_label:?}"))
            })?;
        let c = Cell::empty(options[idx].clone());
        c.attach(self, Name::Field("value".into()));
        self.0.borrow_mut().content = Content::Wrap {
            selection: Some(WrapSelection::Option(idx)),
            child: Some(c.clone()),
        };
        self.mark_defined();
        Ok(c)
    }

    /// Pack a record's fields as usual, except `field` (matched by name),
    /// whose bytes are zeroed regardless of its content. The "copy with one
    /// field cleared" idiom the reference schemas use to compute a checksum
    /// over everything but the checksum leaf itself.
    pub fn pack_with_zeroed_field(&self, field: &str) -> Result<Vec<u8>> {
        let mut buf = BinRepr::new();
        if !self.pack_into_zeroing(&mut buf, Offset::ZERO, field)? {
            return Err(CellError::ValueType(format!(
                "cannot pack with {field:?} zeroed: another field has no content, default, or imputed value"
            )));
        }
        Ok(buf.pack(Some(0), true)?)
    }

    fn pack_into_zeroing(&self, buf: &mut BinRepr, base: Offset, skip: &str) -> Result<bool> {
        let ty = self.ty();
        let fields = match ty.kind() {
            Kind::Record(fs) => fs,
            _ => return self.pack_into(buf, base),
        };
        for i in 0..fields.len() {
            let child = self.children()[i].clone();
            let off = self.field_offset(i)?;
            let is_skip = matches!(child.name(), Some(Name::Field(ref f)) if f == skip);
            if is_skip {
                let len = child.packlen().byte_ceil();
                buf.write((base + off).bytes, &vec![0u8; len]);
            } else if !child.pack_into(buf, base + off)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Array-level analogue of `check_fixed` (invariant 6 isn't leaf-only —
    /// `Str[4].fixed("TEST")` fixes a whole string, not one character). A
    /// char-element array compares as bytes; any other array compares as
    /// `Work::Array` of its elements' working values.
    fn check_fixed_array(&self, element: &CellType, items: &[Work]) -> Result<()> {
        let Some(fixed) = self.ty().fixed_value() else {
            return Ok(());
        };
        let candidate = if matches!(element.kind(), Kind::Leaf(LeafKind::Char)) {
            let mut bytes = Vec::with_capacity(items.len());
            for it in items {
                bytes.push(it.as_int()? as u8);
            }
            Work::Bytes(bytes)
        } else {
            Work::Array(items.to_vec())
        };
        if fixed != &candidate {
            return Err(CellError::ValueFixed {
                expected: format!("{fixed:?}"),
                got: format!("{candidate:?}"),
            });
        }
        Ok(())
    }

    fn check_fixed(&self, v: &Work) -> Result<()> {
        if let Some(fixed) = self.ty().fixed_value() {
            if fixed != v {
                return Err(CellError::ValueFixed {
                    expected: format!("{fixed:?}"),
                    got: format!("{v:?}"),
                });
            }
        }
        Ok(())
    }

    // ---- repr / unrepr ----------------------------------------------------

    pub fn repr(&self) -> Option<Repr> {
        let ty = self.ty();
        match ty.kind() {
            Kind::Leaf(lk) => {
                let w = self.work()?;
                Some(match lk {
                    LeafKind::Char => {
                        let b = w.as_int().ok()? as u8;
                        Repr::Text((b as char).to_string())
                    }
                    LeafKind::Raw { .. } => Repr::Bytes(w.as_bytes().ok()?.to_vec()),
                    _ => {
                        let n = w.as_int().ok()?;
                        if let Some(table) = ty.enum_table() {
                            if let Some(name) = table.name_of(n) {
                                return Some(Repr::Text(name.to_string()));
                            }
                        }
                        Repr::Num(n)
                    }
                })
            }
            Kind::Record(_) => {
                let mut out = Vec::new();
                for c in self.children() {
                    out.push((c.name()?.display(), c.repr()?));
                }
                Some(Repr::Map(out))
            }
            Kind::Array { element, .. } => {
                if matches!(element.kind(), Kind::Leaf(LeafKind::Char)) {
                    let s: String = self
                        .children()
                        .iter()
                        .filter_map(|c| c.repr())
                        .map(|r| match r {
                            Repr::Text(s) => s,
                            _ => String::new(),
                        })
                        .collect();
                    return Some(Repr::Text(s));
                }
                let mut out = Vec::new();
                for c in self.children() {
                    out.push(c.repr()?);
                }
                Some(Repr::Seq(out))
            }
            Kind::Wrap { .. } => {
                let child = match &self.0.borrow().content {
                    Content::Wrap { child, .. } => child.clone(),
                    _ => None,
                };
                child?.repr()
            }
            Kind::VarWrap { element } => {
                let elements = match &self.0.borrow().content {
                    Content::VarWrap(d) => d.elements.clone(),
                    _ => None,
                }?;
                if matches!(element.kind(), Kind::Leaf(LeafKind::Char)) {
                    let s: String = elements
                        .iter()
                        .filter_map(|c| c.repr())
                        .map(|r| match r {
                            Repr::Text(s) => s,
                            _ => String::new(),
                        })
                        .collect();
                    return Some(Repr::Text(s));
                }
                let mut out = Vec::new();
                for c in elements {
                    out.push(c.repr()?);
                }
                Some(Repr::Seq(out))
            }
        }
    }

    pub fn unrepr(&self, v: Repr) -> Result<()> {
        let ty = self.ty();
        match ty.kind() {
            Kind::Leaf(lk) => match lk {
                LeafKind::Char => {
                    let s = v.as_text()?;
                    let b = s.as_bytes().first().copied().ok_or_else(|| {
                        CellError::ValueType("empty character representation".into())
                    })?;
                    self.unwork(Work::Int(b as i128))
                }
                LeafKind::Raw { .. } => self.unwork(Work::Bytes(v.as_bytes()?.to_vec())),
                _ => {
                    if let Repr::Text(name) = &v {
                        if let Some(table) = ty.enum_table() {
                            if let Some(n) = table.value_of(name) {
                                return self.unwork(Work::Int(n));
                            }
                        }
                    }
                    self.unwork(Work::Int(v.as_num()?))
                }
            },
            Kind::Record(fields) => {
                let entries = v.as_map()?;
                for (name, _) in entries {
                    if !fields.iter().any(|f| &f.name == name) {
                        return Err(CellError::UnknownField(name.clone()));
                    }
                }
                for child in self.children() {
                    if let Some(fname) = child.name().and_then(|n| n.as_field().map(str::to_owned)) {
                        if let Some((_, val)) = entries.iter().find(|(n, _)| n == &fname) {
                            child.unrepr(val.clone())?;
                        }
                    }
                }
                self.mark_defined();
                Ok(())
            }
            Kind::Array { element, count } => {
                if matches!(element.kind(), Kind::Leaf(LeafKind::Char)) {
                    let s = v.as_text()?;
                    if s.len() != *count {
                        return Err(CellError::LengthMismatch(format!(
                            "expected {count} characters, got {}",
                            s.len()
                        )));
                    }
                    if let Some(fixed) = ty.fixed_value() {
                        let candidate = Work::Bytes(s.as_bytes().to_vec());
                        if fixed != &candidate {
                            return Err(CellError::ValueFixed {
                                expected: format!("{fixed:?}"),
                                got: format!("{candidate:?}"),
                            });
                        }
                    }
                    for (child, b) in self.children().iter().zip(s.bytes()) {
                        child.unrepr(Repr::Text((b as char).to_string()))?;
                    }
                    self.mark_defined();
                    return Ok(());
                }
                let items = v.as_seq()?;
                if items.len() != *count {
                    return Err(CellError::LengthMismatch(format!(
                        "expected {} elements, got {}",
                        count,
                        items.len()
                    )));
                }
                for (child, val) in self.children().iter().zip(items) {
                    child.unrepr(val.clone())?;
                }
                self.mark_defined();
                Ok(())
            }
            Kind::Wrap { options, fallback } => {
                for opt in options {
                    let c = Cell::empty(opt.clone());
                    c.attach(self, Name::Field("value".into()));
                    if c.unrepr(v.clone()).is_ok() {
                        let idx = options.iter().position(|o| std::ptr::eq(o.kind(), opt.kind()));
                        self.0.borrow_mut().content = Content::Wrap {
                            selection: idx.map(WrapSelection::Option),
                            child: Some(c),
                        };
                        self.mark_defined();
                        return Ok(());
                    }
                }
                let c = Cell::empty(fallback.clone());
                c.attach(self, Name::Field("value".into()));
                c.unrepr(v)?;
                self.0.borrow_mut().content = Content::Wrap {
                    selection: Some(WrapSelection::Fallback),
                    child: Some(c),
                };
                self.mark_defined();
                Ok(())
            }
            Kind::VarWrap { element } => {
                let text_mode = matches!(element.kind(), Kind::Leaf(LeafKind::Char));
                let reprs: Vec<Repr> = if text_mode {
                    v.as_text()?
                        .bytes()
                        .map(|b| Repr::Text((b as char).to_string()))
                        .collect()
                } else {
                    v.as_seq()?.to_vec()
                };
                let mut els = Vec::new();
                for (i, r) in reprs.iter().enumerate() {
                    let c = Cell::empty(element.clone());
                    c.attach(self, Name::Index(i));
                    c.unrepr(r.clone())?;
                    els.push(c);
                }
                let n = els.len();
                let total = els.iter().fold(Offset::ZERO, |acc, c| acc + c.packlen());
                if let Content::VarWrap(d) = &mut self.0.borrow_mut().content {
                    d.elements = Some(els);
                }
                self.count_cell_force(n as i128);
                self.packlen_cell_force(total.byte_ceil() as i128);
                self.mark_defined();
                Ok(())
            }
        }
    }

    // ---- unpack -----------------------------------------------------------

    /// Parse `ty` from `data` starting at byte `offset`, returning the new
    /// cell tree. Unparsed trailing bytes are retained for `pack_with_holes`.
    pub fn unpack(ty: CellType, data: &[u8], offset: usize) -> Result<Self> {
        let cell = Cell::empty(ty);
        cell.unpack_into(data, Offset::from_bytes(offset))?;
        let consumed = Offset::from_bytes(offset) + cell.packlen();
        if consumed.byte_ceil() < data.len() {
            let tail = data[consumed.byte_ceil()..].to_vec();
            cell.0.borrow_mut().tail = Some((consumed.byte_ceil(), tail));
        }
        Ok(cell)
    }

    fn unpack_into(&self, data: &[u8], base: Offset) -> Result<()> {
        if let Some(parent) = self.parent() {
            self.reject_varwrap_virtual_mutation(&parent)?;
        }
        let ty = self.ty();
        match ty.kind() {
            Kind::Leaf(lk) => {
                let endian = self.effective_endian();
                let ptrbytes = self.effective_ptrsize() / 8;
                let value = match lk {
                    LeafKind::Int { width } => {
                        Work::Int(leaf::decode_int(data, base.bytes, *width, endian)?)
                    }
                    LeafKind::Pointer => {
                        Work::Int(leaf::decode_int(data, base.bytes, ptrbytes, endian)?)
                    }
                    LeafKind::Bits { width } => Work::Int(leaf::decode_bits(
                        data, base.bytes, base.bits, *width, endian,
                    )?),
                    LeafKind::Char => Work::Int(leaf::decode_char(data, base.bytes)? as i128),
                    LeafKind::Raw { len } => {
                        let n = len.unwrap_or_else(|| data.len().saturating_sub(base.bytes));
                        Work::Bytes(leaf::decode_raw(data, base.bytes, n)?)
                    }
                };
                self.check_fixed(&value)?;
                self.0.borrow_mut().content = Content::Leaf(Some(value));
                self.mark_defined();
                Ok(())
            }
            Kind::Record(_) => {
                let n = self.children().len();
                for i in 0..n {
                    let off = self.field_offset(i)?;
                    self.children()[i].unpack_into(data, base + off)?;
                }
                self.mark_defined();
                Ok(())
            }
            Kind::Array { element, .. } => {
                let mut acc = Offset::ZERO;
                for child in self.children() {
                    child.unpack_into(data, base + acc)?;
                    acc = acc + child.packlen();
                }
                if ty.fixed_value().is_some() {
                    let parsed: Vec<Work> = self
                        .children()
                        .iter()
                        .map(|c| c.work().unwrap_or(Work::Int(0)))
                        .collect();
                    self.check_fixed_array(element, &parsed)?;
                }
                self.mark_defined();
                Ok(())
            }
            Kind::Wrap { options, fallback } => {
                for (i, opt) in options.iter().enumerate() {
                    let c = Cell::empty(opt.clone());
                    c.attach(self, Name::Field("value".into()));
                    if c.unpack_into(data, base).is_ok() {
                        self.0.borrow_mut().content = Content::Wrap {
                            selection: Some(WrapSelection::Option(i)),
                            child: Some(c),
                        };
                        self.mark_defined();
                        return Ok(());
                    }
                }
                let c = Cell::empty(fallback.clone());
                c.attach(self, Name::Field("value".into()));
                c.unpack_into(data, base)?;
                self.0.borrow_mut().content = Content::Wrap {
                    selection: Some(WrapSelection::Fallback),
                    child: Some(c),
                };
                self.mark_defined();
                Ok(())
            }
            Kind::VarWrap { element } => self.unpack_varwrap(&element, data, base),
        }
    }

    fn unpack_varwrap(&self, element: &CellType, data: &[u8], base: Offset) -> Result<()> {
        let (count_declared, packlen_declared) = {
            let node = self.0.borrow();
            match &node.content {
                Content::VarWrap(d) => (
                    d.count_cell.isdef().then(|| d.count_cell.work().and_then(|w| w.as_int().ok()).unwrap_or(0) as usize),
                    d.packlen_cell.isdef().then(|| d.packlen_cell.work().and_then(|w| w.as_int().ok()).unwrap_or(0) as usize),
                ),
                _ => (None, None),
            }
        };
        let avail = data.len().saturating_sub(base.bytes);
        let budget = packlen_declared.unwrap_or(avail).min(avail);

        let mut elems = Vec::new();
        let mut consumed = 0usize;
        loop {
            if let Some(c) = count_declared {
                if elems.len() >= c {
                    break;
                }
            }
            if consumed >= budget {
                break;
            }
            let c = Cell::empty(element.clone());
            c.attach(self, Name::Index(elems.len()));
            match c.unpack_into(data, base + Offset::from_bytes(consumed)) {
                Ok(()) => {
                    let len = c.packlen().byte_ceil();
                    if consumed + len > budget {
                        break;
                    }
                    consumed += len;
                    elems.push(c);
                }
                Err(_) => break,
            }
        }

        let count_ok = count_declared.is_none_or(|c| elems.len() == c);
        let packlen_ok = packlen_declared.is_none_or(|p| consumed == p);

        // A count mismatch alone keeps the partially-parsed elements
        // (virtual, not invalid): only a packlen mismatch falls back to raw.
        if !count_ok {
            let n = elems.len();
            if let Content::VarWrap(d) = &mut self.0.borrow_mut().content {
                d.elements = Some(elems);
            }
            self.count_cell_force(n as i128);
            self.packlen_cell_force(consumed as i128);
            self.mark_defined();
            return Err(CellError::LengthMismatch("wrong count".into()));
        }
        if !packlen_ok {
            self.fallback_to_raw(data, base, budget);
            return Err(CellError::LengthMismatch("wrong packlen".into()));
        }

        let n = elems.len();
        if let Content::VarWrap(d) = &mut self.0.borrow_mut().content {
            d.elements = Some(elems);
        }
        self.count_cell_force(n as i128);
        self.packlen_cell_force(consumed as i128);
        self.mark_defined();
        Ok(())
    }

    fn fallback_to_raw(&self, data: &[u8], base: Offset, budget: usize) {
        let end = (base.bytes + budget).min(data.len());
        let raw = data[base.bytes..end].to_vec();
        let n = raw.len();
        if let Content::VarWrap(d) = &mut self.0.borrow_mut().content {
            d.raw_fallback = Some(raw);
        }
        self.packlen_cell_force(n as i128);
        self.mark_defined();
    }

    // ---- pack ---------------------------------------------------------

    /// Dense bytes for this cell alone, `[0, packlen())`. `Ok(None)` if some
    /// leaf within has no content, default, or rule-imputed value.
    pub fn pack(&self) -> Result<Option<Vec<u8>>> {
        let mut buf = BinRepr::new();
        if !self.pack_into(&mut buf, Offset::ZERO)? {
            return Ok(None);
        }
        Ok(Some(buf.pack(None, true)?))
    }

    /// As `pack`, but splices back any bytes a parse didn't understand
    /// (wrap fallbacks, varwrap raw-fallback state, unconsumed tail) so a
    /// partially-understood file round-trips byte-identical.
    pub fn pack_with_holes(&self) -> Result<Vec<u8>> {
        let mut buf = BinRepr::new();
        self.pack_into(&mut buf, Offset::ZERO)?;
        let mut tails = Vec::new();
        self.collect_tails(Offset::ZERO, &mut tails);
        for (off, bytes) in tails {
            buf.write(off, &bytes);
        }
        Ok(buf.pack(None, true)?)
    }

    fn collect_tails(&self, base: Offset, out: &mut Vec<(usize, Vec<u8>)>) {
        if let Some((off, bytes)) = self.0.borrow().tail.clone() {
            out.push((off, bytes));
        }
        let ty = self.ty();
        match ty.kind() {
            Kind::Record(_) => {
                let n = self.children().len();
                for i in 0..n {
                    let off = self.field_offset(i).unwrap_or(Offset::ZERO);
                    self.children()[i].collect_tails(base + off, out);
                }
            }
            Kind::Array { .. } => {
                let mut acc = Offset::ZERO;
                for c in self.children() {
                    c.collect_tails(base + acc, out);
                    acc = acc + c.packlen();
                }
            }
            Kind::Wrap { .. } => {
                if let Content::Wrap { child: Some(c), .. } = &self.0.borrow().content {
                    c.collect_tails(base, out);
                }
            }
            Kind::VarWrap { .. } => {
                if let Content::VarWrap(d) = &self.0.borrow().content {
                    if let Some(raw) = &d.raw_fallback {
                        out.push((base.bytes, raw.clone()));
                    }
                }
            }
            Kind::Leaf(_) => {}
        }
    }

    /// Write this cell's bytes at `base` into `buf`. Returns `false` (buf
    /// left untouched past what was already written) if a leaf had nothing
    /// to pack.
    fn pack_into(&self, buf: &mut BinRepr, base: Offset) -> Result<bool> {
        let ty = self.ty();
        match ty.kind() {
            Kind::Leaf(lk) => {
                let Some(w) = self.work() else {
                    return Ok(false);
                };
                let endian = self.effective_endian();
                let ptrbytes = self.effective_ptrsize() / 8;
                match lk {
                    LeafKind::Bits { width } => {
                        let bytes = leaf::encode_bits(w.as_int()?, base.bits, *width, endian);
                        let mut local = BinRepr::new();
                        local.write(0, &bytes);
                        buf.xor(&local, base.bytes);
                    }
                    LeafKind::Int { width } => {
                        buf.write(base.bytes, &leaf::encode_int(w.as_int()?, *width, endian));
                    }
                    LeafKind::Pointer => {
                        buf.write(base.bytes, &leaf::encode_int(w.as_int()?, ptrbytes, endian));
                    }
                    LeafKind::Char => {
                        buf.write(base.bytes, &[w.as_int()? as u8]);
                    }
                    LeafKind::Raw { .. } => {
                        buf.write(base.bytes, w.as_bytes()?);
                    }
                }
                Ok(true)
            }
            Kind::Record(_) => {
                let n = self.children().len();
                for i in 0..n {
                    let off = self.field_offset(i)?;
                    if !self.children()[i].pack_into(buf, base + off)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Kind::Array { .. } => {
                let mut acc = Offset::ZERO;
                for c in self.children() {
                    if !c.pack_into(buf, base + acc)? {
                        return Ok(false);
                    }
                    acc = acc + c.packlen();
                }
                Ok(true)
            }
            Kind::Wrap { .. } => {
                let child = match &self.0.borrow().content {
                    Content::Wrap { child, .. } => child.clone(),
                    _ => None,
                };
                match child {
                    Some(c) => c.pack_into(buf, base),
                    None => Ok(false),
                }
            }
            Kind::VarWrap { .. } => {
                let (elements, raw) = match &self.0.borrow().content {
                    Content::VarWrap(d) => (d.elements.clone(), d.raw_fallback.clone()),
                    _ => (None, None),
                };
                if let Some(raw) = raw {
                    buf.write(base.bytes, &raw);
                    return Ok(true);
                }
                let Some(els) = elements else {
                    return Ok(false);
                };
                let mut acc = Offset::ZERO;
                for c in els {
                    if !c.pack_into(buf, base + acc)? {
                        return Ok(false);
                    }
                    acc = acc + c.packlen();
                }
                Ok(true)
            }
        }
    }

    // ---- check / show -----------------------------------------------------

    pub fn check(&self) -> Result<()> {
        let (root, _) = self.path();
        rules::check(&root)
    }

    pub fn show(&self, indent: usize) -> String {
        let pad = "  ".repeat(indent);
        let name = self
            .name()
            .map(|n| n.display())
            .unwrap_or_else(|| "<root>".to_string());
        let ty = self.ty();
        match ty.kind() {
            Kind::Leaf(_) => format!(
                "{pad}{name} @{}: {}",
                self.absolute_byte_offset(),
                self.repr()
                    .map(|r| format!("{r:?}"))
                    .unwrap_or_else(|| "<undefined>".to_string())
            ),
            Kind::Record(_) => {
                let mut s = format!("{pad}{name} @{} (record):\n", self.absolute_byte_offset());
                for c in self.children() {
                    s.push_str(&c.show(indent + 1));
                    s.push('\n');
                }
                s.pop();
                s
            }
            Kind::Array { .. } => {
                let mut s = format!("{pad}{name} @{} (array):\n", self.absolute_byte_offset());
                for c in self.children() {
                    s.push_str(&c.show(indent + 1));
                    s.push('\n');
                }
                s.pop();
                s
            }
            Kind::Wrap { .. } => {
                let child = match &self.0.borrow().content {
                    Content::Wrap { child, .. } => child.clone(),
                    _ => None,
                };
                match child {
                    Some(c) => format!("{pad}{name} (wrap):\n{}", c.show(indent + 1)),
                    None => format!("{pad}{name} (wrap, undefined)"),
                }
            }
            Kind::VarWrap { .. } => {
                let elements = match &self.0.borrow().content {
                    Content::VarWrap(d) => d.elements.clone(),
                    _ => None,
                };
                let mut s = format!("{pad}{name} @{} (varwrap):\n", self.absolute_byte_offset());
                for c in elements.unwrap_or_default() {
                    s.push_str(&c.show(indent + 1));
                    s.push('\n');
                }
                s.pop();
                s
            }
        }
    }

    fn absolute_byte_offset(&self) -> usize {
        let Some(parent) = self.parent() else {
            return 0;
        };
        let Some(Name::Field(name)) = self.name() else {
            return parent.absolute_byte_offset();
        };
        let fields = match parent.ty().kind() {
            Kind::Record(fs) => fs.clone(),
            _ => return parent.absolute_byte_offset(),
        };
        let idx = fields.iter().position(|f| f.name == name).unwrap_or(0);
        let rel = parent.field_offset(idx).unwrap_or(Offset::ZERO);
        parent.absolute_byte_offset() + rel.bytes
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::rules::{Path, Rule};

    fn int_field(name: &str, default: i128) -> FieldDef {
        FieldDef {
            name: name.into(),
            ty: CellType::int(4).unwrap().default_value(Work::Int(default)),
            offset: None,
        }
    }

    // S1: Struct[(a, Int_default_1), (b, Int_default_2)], little-endian.
    #[test]
    fn s1_struct_unpack_and_roundtrip() {
        let ty = CellType::record(vec![int_field("a", 1), int_field("b", 2)]).unwrap();
        let bytes = hex!("01 00 00 00 02 00 00 00");
        let cell = Cell::unpack(ty.clone(), &bytes, 0).unwrap();
        let work = cell.work().unwrap();
        assert_eq!(work.field("a"), Some(&Work::Int(1)));
        assert_eq!(work.field("b"), Some(&Work::Int(2)));
        let packed = cell.pack().unwrap().unwrap();
        assert_eq!(packed, bytes);
    }

    #[test]
    fn empty_struct_reads_back_declared_defaults() {
        let ty = CellType::record(vec![int_field("a", 1), int_field("b", 2)]).unwrap();
        let cell = Cell::empty(ty);
        let work = cell.work().unwrap();
        assert_eq!(work.field("a"), Some(&Work::Int(1)));
        assert_eq!(work.field("b"), Some(&Work::Int(2)));
    }

    // S2: Struct[(len, Int_default_4), (text, VarStr)] with
    // Equal(len, text.count); constructing with only `text` set must read
    // `len` back as 2 (the rule overrides the static default) and pack to
    // `02 00 00 00 41 42`.
    #[test]
    fn s2_varwrap_length_rule_overrides_default_and_packs() {
        let ty = CellType::record(vec![
            FieldDef {
                name: "len".into(),
                ty: CellType::int(4)
                    .unwrap()
                    .default_value(Work::Int(4))
                    .with_rules(vec![Rule::Equal(vec![
                        Path::new("len"),
                        Path::new("text.count"),
                    ])]),
                offset: None,
            },
            FieldDef {
                name: "text".into(),
                ty: CellType::varwrap(CellType::char_leaf()),
                offset: None,
            },
        ])
        .unwrap()
        .endian(Endian::Little);

        let cell = Cell::empty(ty);
        let text = cell.child_named("text").unwrap();
        text.unwork(Work::Array(vec![Work::Int(b'A' as i128), Work::Int(b'B' as i128)]))
            .unwrap();

        let len_work = cell.child_named("len").unwrap().work().unwrap();
        assert_eq!(len_work, Work::Int(2));

        let packed = cell.pack().unwrap().unwrap();
        assert_eq!(packed, vec![0x02, 0x00, 0x00, 0x00, b'A', b'B']);
    }

    // S3: Str[4].fixed("TEST") rejects any other assignment.
    #[test]
    fn s3_fixed_string_rejects_mismatched_assignment() {
        let ty = CellType::string(4).fixed(Work::Bytes(b"TEST".to_vec()));
        let cell = Cell::empty(ty);
        let err = cell.unrepr(Repr::Text("XXXX".into())).unwrap_err();
        assert!(matches!(err, CellError::ValueFixed { .. }));

        let ok = Cell::empty(CellType::string(4).fixed(Work::Bytes(b"TEST".to_vec())));
        ok.unrepr(Repr::Text("TEST".into())).unwrap();
        assert_eq!(ok.repr().unwrap(), Repr::Text("TEST".into()));
    }

    #[test]
    fn fixed_leaf_rejects_mismatched_unpack() {
        let ty = CellType::int(1).unwrap().fixed(Work::Int(0x7f));
        let err = Cell::unpack(ty, &[0x01], 0).unwrap_err();
        assert!(matches!(err, CellError::ValueFixed { .. }));
    }

    // Property 6: bit-fields within a record pack to the exact concatenation
    // of their declared values, ordered by endianness.
    #[test]
    fn bitfield_record_packs_to_declared_byte_layout() {
        let ty = CellType::record(vec![
            FieldDef {
                name: "hi".into(),
                ty: CellType::bits(4).unwrap(),
                offset: None,
            },
            FieldDef {
                name: "lo".into(),
                ty: CellType::bits(4).unwrap(),
                offset: None,
            },
        ])
        .unwrap()
        .endian(Endian::Big);
        let cell = Cell::empty(ty);
        cell.unwork(Work::Record(vec![
            ("hi".into(), Work::Int(0xA)),
            ("lo".into(), Work::Int(0x5)),
        ]))
        .unwrap();
        let packed = cell.pack().unwrap().unwrap();
        assert_eq!(packed, vec![0xA5]);

        let reparsed = Cell::unpack(cell.ty(), &packed, 0).unwrap();
        assert_eq!(reparsed.work(), cell.work());
    }

    // Property 7: Equal(a, b) imputes a shared value when only one is set,
    // and `check` rejects a disagreement without mutating either leaf.
    #[test]
    fn equal_rule_imputes_and_check_flags_disagreement() {
        let ty = CellType::record(vec![
            FieldDef {
                name: "a".into(),
                ty: CellType::int(4)
                    .unwrap()
                    .with_rules(vec![Rule::Equal(vec![Path::new("a"), Path::new("b")])]),
                offset: None,
            },
            FieldDef {
                name: "b".into(),
                ty: CellType::int(4).unwrap(),
                offset: None,
            },
        ])
        .unwrap();

        let cell = Cell::empty(ty.clone());
        cell.child_named("a").unwrap().unwork(Work::Int(7)).unwrap();
        assert_eq!(cell.child_named("b").unwrap().work(), Some(Work::Int(7)));
        assert_eq!(cell.child_named("a").unwrap().work(), Some(Work::Int(7)));
        assert!(cell.check().is_ok());

        let mismatched = Cell::empty(ty);
        mismatched.child_named("a").unwrap().unwork(Work::Int(7)).unwrap();
        mismatched.child_named("b").unwrap().unwork(Work::Int(9)).unwrap();
        assert_eq!(mismatched.child_named("a").unwrap().work(), Some(Work::Int(7)));
        assert_eq!(mismatched.child_named("b").unwrap().work(), Some(Work::Int(9)));
        assert!(mismatched.check().is_err());
    }

    // Property 8 / varwrap greediness: given a declared byte budget `S` that
    // doesn't divide evenly by the element size `e`, the varwrap parses
    // `S div e` elements, can't consume exactly `S` bytes, and falls back to
    // raw with a `wrong packlen` report.
    #[test]
    fn varwrap_parses_greedily_and_reports_leftover_bytes() {
        let ty = CellType::varwrap(CellType::int(2).unwrap());
        let cell = Cell::empty(ty);
        cell.packlen_cell_force(7); // declared budget, not divisible by element size 2
        let data = [0u8, 1, 0, 2, 0, 3, 0xff]; // 3 whole 2-byte elements + 1 leftover byte
        let err = cell.unpack_into(&data, Offset::ZERO).unwrap_err();
        assert!(matches!(err, CellError::LengthMismatch(_)));
    }

    #[test]
    fn varwrap_with_exact_budget_parses_cleanly() {
        let ty = CellType::varwrap(CellType::int(2).unwrap());
        let data = [0u8, 1, 0, 2, 0, 3];
        let cell = Cell::empty(ty);
        cell.unpack_into(&data, Offset::ZERO).unwrap();
        let elements = cell.work().unwrap();
        assert_eq!(
            elements,
            Work::Array(vec![Work::Int(0x0100), Work::Int(0x0200), Work::Int(0x0300)])
        );
        assert_eq!(
            cell.child_named("count").unwrap().work(),
            Some(Work::Int(3))
        );
    }

    // A declared count that the data can't satisfy reports `wrong count` but
    // keeps the elements actually parsed, unlike a packlen mismatch which
    // discards the parse and falls back to raw data.
    #[test]
    fn varwrap_count_mismatch_keeps_partial_elements() {
        let ty = CellType::varwrap(CellType::int(2).unwrap());
        let cell = Cell::empty(ty);
        cell.count_cell_force(5); // declared count, data only holds 3 elements
        let data = [0u8, 1, 0, 2, 0, 3];
        let err = cell.unpack_into(&data, Offset::ZERO).unwrap_err();
        assert!(matches!(err, CellError::LengthMismatch(_)));
        assert_eq!(
            cell.work().unwrap(),
            Work::Array(vec![Work::Int(0x0100), Work::Int(0x0200), Work::Int(0x0300)])
        );
    }

    #[test]
    fn defined_varwrap_rejects_virtual_count_mutation() {
        let ty = CellType::varwrap(CellType::char_leaf());
        let cell = Cell::empty(ty);
        cell.unwork(Work::Array(vec![Work::Int(b'x' as i128)])).unwrap();
        let count = cell.child_named("count").unwrap();
        let err = count.unwork(Work::Int(5)).unwrap_err();
        assert!(matches!(err, CellError::ValueType(_)));
    }

    #[test]
    fn unknown_field_in_record_representation_fails() {
        let ty = CellType::record(vec![int_field("a", 0)]).unwrap();
        let cell = Cell::empty(ty);
        let err = cell
            .unwork(Work::Record(vec![("nope".into(), Work::Int(1))]))
            .unwrap_err();
        assert!(matches!(err, CellError::UnknownField(_)));
    }

    #[test]
    fn array_length_mismatch_is_rejected() {
        let ty = CellType::array(CellType::int(1).unwrap(), 3);
        let cell = Cell::empty(ty);
        let err = cell
            .unwork(Work::Array(vec![Work::Int(1), Work::Int(2)]))
            .unwrap_err();
        assert!(matches!(err, CellError::LengthMismatch(_)));
    }

    #[test]
    fn wrap_selects_first_matching_option_by_trial_parse() {
        let tagged = CellType::record(vec![
            FieldDef {
                name: "tag".into(),
                ty: CellType::int(1).unwrap().fixed(Work::Int(1)),
                offset: None,
            },
            FieldDef {
                name: "value".into(),
                ty: CellType::int(1).unwrap(),
                offset: None,
            },
        ])
        .unwrap();
        let wrap_ty = CellType::wrap(vec![tagged], CellType::raw());
        let data = [1u8, 42];
        let cell = Cell::unpack(wrap_ty, &data, 0).unwrap();
        let work = cell.work().unwrap().as_wrap().unwrap().clone();
        assert_eq!(work.field("value"), Some(&Work::Int(42)));
    }

    #[test]
    fn wrap_falls_back_to_raw_when_no_option_matches() {
        let tagged = CellType::record(vec![FieldDef {
            name: "tag".into(),
            ty: CellType::int(1).unwrap().fixed(Work::Int(1)),
            offset: None,
        }])
        .unwrap();
        let wrap_ty = CellType::wrap(vec![tagged], CellType::raw());
        let data = [9u8, 9, 9];
        let cell = Cell::unpack(wrap_ty, &data, 0).unwrap();
        assert_eq!(cell.work(), Some(Work::Wrap(Box::new(Work::Bytes(vec![9, 9, 9])))));
    }

    #[test]
    fn show_dumps_nested_record_with_offsets() {
        let ty = CellType::record(vec![int_field("a", 5)]).unwrap();
        let cell = Cell::empty(ty);
        let dump = cell.show(0);
        assert!(dump.contains("record"));
        assert!(dump.contains('a'));
    }
}
