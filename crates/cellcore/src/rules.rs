//! The rule / constraint engine (§4.D): equality (and, reserved, linear)
//! constraints over a cell tree, grouped into connected components and
//! consulted when an undefined leaf is read through its working view.

use std::collections::{HashMap, HashSet};

use crate::cell::Cell;
use crate::error::Result;
use crate::value::Work;

/// A dotted path rooted at the cell declaring the rule, e.g. `"header.ihl"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Path(pub String);

impl Path {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    fn segments(&self) -> Vec<&str> {
        self.0.split('.').collect()
    }
}

/// A declared constraint. `Linear` is reserved: the source never shipped a
/// solver for it (design notes §9), so components built from only `Linear`
/// rules are left at their per-leaf defaults and logged, not solved.
#[derive(Clone, Debug)]
pub enum Rule {
    Equal(Vec<Path>),
    Linear(Vec<(i128, Path)>),
}

impl Rule {
    fn paths(&self) -> Vec<&Path> {
        match self {
            Rule::Equal(paths) => paths.iter().collect(),
            Rule::Linear(terms) => terms.iter().map(|(_, p)| p).collect(),
        }
    }
}

/// Resolve a dotted path from `from`, walking ancestors until a record
/// containing the first segment is found, then descending through it.
pub fn resolve_path(from: &Cell, path: &Path) -> Option<Cell> {
    let segs = path.segments();
    let first = *segs.first()?;
    let mut root = from.clone();
    loop {
        if root.child_named(first).is_some() {
            break;
        }
        match root.parent() {
            Some(p) => root = p,
            None => return None,
        }
    }
    let mut cur = root;
    for seg in segs {
        cur = cur.child_named(seg)?;
    }
    Some(cur)
}

/// Root-scoped constraint solver: traverses the tree once, groups impacted
/// leaves into connected components by shared rule membership, and imputes
/// values for leaves the caller hasn't set explicitly.
pub struct RuleManager {
    cache: HashMap<Path, Work>,
}

impl RuleManager {
    /// Run once per top-level read. `origin` is the leaf whose undefined
    /// read triggered this; `root` is the cell tree's root.
    pub fn run(root: &Cell) -> Self {
        let mut all_rules: Vec<(Cell, Rule)> = Vec::new();
        collect_rules(root, &mut all_rules);

        // Resolve every path relative to its declaring cell into an actual
        // leaf `Cell`, dropping rules with any unresolved path (silently, per
        // spec: "missing paths at rule-attach time silently drop the rule").
        let mut edges: Vec<(Vec<Cell>, &Rule)> = Vec::new();
        for (declaring, rule) in &all_rules {
            let mut leaves = Vec::new();
            let mut ok = true;
            for p in rule.paths() {
                match resolve_path(declaring, p) {
                    Some(c) => leaves.push(c),
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                edges.push((leaves, rule));
            }
        }

        // Union-find over cell identities to build connected components.
        let mut parent_of: HashMap<usize, usize> = HashMap::new();
        let mut id_of: HashMap<usize, Cell> = HashMap::new();
        fn find(parent_of: &mut HashMap<usize, usize>, x: usize) -> usize {
            let p = *parent_of.get(&x).unwrap_or(&x);
            if p == x {
                x
            } else {
                let r = find(parent_of, p);
                parent_of.insert(x, r);
                r
            }
        }
        fn union(parent_of: &mut HashMap<usize, usize>, a: usize, b: usize) {
            let ra = find(parent_of, a);
            let rb = find(parent_of, b);
            if ra != rb {
                parent_of.insert(ra, rb);
            }
        }
        for (leaves, _) in &edges {
            for l in leaves {
                let id = l.identity();
                parent_of.entry(id).or_insert(id);
                id_of.insert(id, l.clone());
            }
            for w in leaves.windows(2) {
                union(&mut parent_of, w[0].identity(), w[1].identity());
            }
        }

        let mut components: HashMap<usize, Vec<Cell>> = HashMap::new();
        let ids: Vec<usize> = id_of.keys().copied().collect();
        for id in ids {
            let root_id = find(&mut parent_of, id);
            components
                .entry(root_id)
                .or_default()
                .push(id_of[&id].clone());
        }

        // Which rule kind governs each component: any Linear rule whose
        // paths fall entirely within the component marks it Linear;
        // otherwise it's treated as Equal.
        let mut cache = HashMap::new();
        for (_root_id, leaves) in components {
            let member_ids: HashSet<usize> = leaves.iter().map(Cell::identity).collect();
            let is_linear = edges.iter().any(|(ls, r)| {
                matches!(r, Rule::Linear(_))
                    && ls.iter().all(|l| member_ids.contains(&l.identity()))
                    && ls.iter().any(|l| member_ids.contains(&l.identity()))
            });
            if is_linear {
                // Reserved: no solver. Leave at defaults, nothing cached.
                continue;
            }
            impute_equality(&leaves, &mut cache);
        }

        Self { cache }
    }

    pub fn imputed(&self, path_key: &Path) -> Option<&Work> {
        self.cache.get(path_key)
    }

    /// Imputed value for a specific leaf, keyed by its absolute path string.
    pub fn imputed_for(&self, leaf: &Cell) -> Option<Work> {
        self.cache.get(&Path(leaf.absolute_path())).cloned()
    }
}

fn collect_rules(cell: &Cell, out: &mut Vec<(Cell, Rule)>) {
    for rule in cell.declared_rules() {
        out.push((cell.clone(), rule));
    }
    for child in cell.children() {
        collect_rules(&child, out);
    }
}

fn impute_equality(leaves: &[Cell], cache: &mut HashMap<Path, Work>) {
    let defined: Vec<Work> = leaves
        .iter()
        .filter(|l| l.isdef())
        .filter_map(|l| l.work_if_defined())
        .collect();
    let distinct: Vec<&Work> = {
        let mut v: Vec<&Work> = Vec::new();
        for w in &defined {
            if !v.iter().any(|x| **x == *w) {
                v.push(w);
            }
        }
        v
    };
    if distinct.len() == 1 {
        let v = distinct[0].clone();
        for l in leaves {
            cache.insert(Path(l.absolute_path()), v.clone());
        }
        return;
    }
    if distinct.len() > 1 {
        // Disagreement: each leaf keeps its own content/default; nothing to
        // impute here (a `check` against this rule will fail separately).
        return;
    }
    // None defined: fall back to declared defaults.
    let defaults: Vec<Work> = leaves.iter().filter_map(Cell::declared_default).collect();
    let distinct_defaults: Vec<&Work> = {
        let mut v: Vec<&Work> = Vec::new();
        for w in &defaults {
            if !v.iter().any(|x| **x == *w) {
                v.push(w);
            }
        }
        v
    };
    if distinct_defaults.len() == 1 {
        let v = distinct_defaults[0].clone();
        for l in leaves {
            cache.insert(Path(l.absolute_path()), v.clone());
        }
    }
    // else: each leaf gets its own default (handled by the leaf's normal
    // `work()` fallback when nothing is cached for it).
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::descriptor::{CellType, FieldDef};

    fn int_field(name: &str, rules: Vec<Rule>) -> FieldDef {
        let mut ty = CellType::int(4).unwrap();
        if !rules.is_empty() {
            ty = ty.with_rules(rules);
        }
        FieldDef { name: name.into(), ty, offset: None }
    }

    fn int_field_default(name: &str, default: i128) -> FieldDef {
        FieldDef {
            name: name.into(),
            ty: CellType::int(4).unwrap().default_value(Work::Int(default)),
            offset: None,
        }
    }

    #[test]
    fn resolve_path_walks_ancestors_to_find_first_segment() {
        let inner = CellType::record(vec![int_field("count", vec![])]).unwrap();
        let outer = CellType::record(vec![
            FieldDef { name: "header".into(), ty: inner, offset: None },
        ])
        .unwrap();
        let root = Cell::empty(outer);
        let header = root.child_named("header").unwrap();
        let count = header.child_named("count").unwrap();

        // "header.count" isn't a child of `count` itself, so resolution
        // climbs past `count` and past `header` to the record root before
        // descending back down through both segments.
        let found = resolve_path(&count, &Path::new("header.count")).unwrap();
        assert_eq!(found.identity(), count.identity());
    }

    #[test]
    fn resolve_path_returns_none_for_unknown_segment() {
        let ty = CellType::record(vec![int_field("a", vec![])]).unwrap();
        let root = Cell::empty(ty);
        let a = root.child_named("a").unwrap();
        assert!(resolve_path(&a, &Path::new("nope")).is_none());
    }

    #[test]
    fn three_member_equal_component_imputes_from_single_defined_leaf() {
        let ty = CellType::record(vec![
            int_field("a", vec![Rule::Equal(vec![Path::new("a"), Path::new("b"), Path::new("c")])]),
            int_field("b", vec![]),
            int_field("c", vec![]),
        ])
        .unwrap();
        let root = Cell::empty(ty);
        root.child_named("a").unwrap().unwork(Work::Int(41)).unwrap();

        let mgr = RuleManager::run(&root);
        let b = root.child_named("b").unwrap();
        let c = root.child_named("c").unwrap();
        assert_eq!(mgr.imputed_for(&b), Some(Work::Int(41)));
        assert_eq!(mgr.imputed_for(&c), Some(Work::Int(41)));
    }

    #[test]
    fn equal_component_falls_back_to_shared_default_when_none_defined() {
        let ty = CellType::record(vec![
            FieldDef {
                name: "a".into(),
                ty: CellType::int(4)
                    .unwrap()
                    .default_value(Work::Int(9))
                    .with_rules(vec![Rule::Equal(vec![Path::new("a"), Path::new("b")])]),
                offset: None,
            },
            int_field_default("b", 9),
        ])
        .unwrap();
        let root = Cell::empty(ty);

        let mgr = RuleManager::run(&root);
        let a = root.child_named("a").unwrap();
        let b = root.child_named("b").unwrap();
        assert_eq!(mgr.imputed_for(&a), Some(Work::Int(9)));
        assert_eq!(mgr.imputed_for(&b), Some(Work::Int(9)));
    }

    #[test]
    fn equal_component_caches_nothing_when_defaults_disagree_and_none_set() {
        let ty = CellType::record(vec![
            FieldDef {
                name: "a".into(),
                ty: CellType::int(4)
                    .unwrap()
                    .default_value(Work::Int(1))
                    .with_rules(vec![Rule::Equal(vec![Path::new("a"), Path::new("b")])]),
                offset: None,
            },
            int_field_default("b", 2),
        ])
        .unwrap();
        let root = Cell::empty(ty);

        let mgr = RuleManager::run(&root);
        let a = root.child_named("a").unwrap();
        let b = root.child_named("b").unwrap();
        assert_eq!(mgr.imputed_for(&a), None);
        assert_eq!(mgr.imputed_for(&b), None);
    }

    #[test]
    fn check_reports_violation_naming_the_disagreeing_paths() {
        let ty = CellType::record(vec![
            int_field("a", vec![Rule::Equal(vec![Path::new("a"), Path::new("b")])]),
            int_field("b", vec![]),
        ])
        .unwrap();
        let root = Cell::empty(ty);
        root.child_named("a").unwrap().unwork(Work::Int(3)).unwrap();
        root.child_named("b").unwrap().unwork(Work::Int(4)).unwrap();

        let err = check(&root).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains('a') && msg.contains('b'));
    }

    #[test]
    fn check_passes_when_only_one_side_of_the_rule_is_set() {
        let ty = CellType::record(vec![
            int_field("a", vec![Rule::Equal(vec![Path::new("a"), Path::new("b")])]),
            int_field("b", vec![]),
        ])
        .unwrap();
        let root = Cell::empty(ty);
        root.child_named("a").unwrap().unwork(Work::Int(3)).unwrap();
        assert!(check(&root).is_ok());
    }
}

/// A cell type's `check`: iterate declared rules, returning the first
/// violation as a descriptive message.
pub fn check(root: &Cell) -> Result<()> {
    let mut all_rules = Vec::new();
    collect_rules(root, &mut all_rules);
    for (declaring, rule) in &all_rules {
        if let Rule::Equal(paths) = rule {
            let mut values = Vec::new();
            let mut resolved = Vec::new();
            for p in paths {
                let Some(leaf) = resolve_path(declaring, p) else {
                    continue;
                };
                if let Some(w) = leaf.work_if_defined() {
                    values.push(w);
                }
                resolved.push(leaf);
            }
            if let Some(first) = values.first() {
                if values.iter().any(|v| v != first) {
                    return Err(crate::error::CellError::RuleViolation(format!(
                        "Equal rule violated among {:?} on cell:\n{}",
                        paths.iter().map(|p| p.0.clone()).collect::<Vec<_>>(),
                        declaring.show(0)
                    )));
                }
            }
        }
    }
    Ok(())
}
