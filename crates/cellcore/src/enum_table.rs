use std::collections::HashMap;

/// A bidirectional table between integers and names, as used by enumerated
/// numeric leaves (`proto` in an IP header, section types in a firmware
/// table). Injective: each numeric value maps to exactly one name and vice
/// versa. Supports additive extension for schema writers who build a table
/// up incrementally (see `inet.py`'s `/etc/protocols` loader).
#[derive(Clone, Debug, Default)]
pub struct EnumTable {
    by_value: HashMap<i128, String>,
    by_name: HashMap<String, i128>,
}

impl EnumTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i128, S)>,
        S: Into<String>,
    {
        let mut t = Self::new();
        for (v, n) in pairs {
            t.extend(v, n);
        }
        t
    }

    /// Add a name/value pair, overwriting any prior mapping for either.
    pub fn extend(&mut self, value: i128, name: impl Into<String>) {
        let name = name.into();
        self.by_value.insert(value, name.clone());
        self.by_name.insert(name, value);
    }

    pub fn name_of(&self, value: i128) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    pub fn value_of(&self, name: &str) -> Option<i128> {
        self.by_name.get(name).copied()
    }
}
