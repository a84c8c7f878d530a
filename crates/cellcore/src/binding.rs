//! Bindings (§4.E): a map attached to a parent format, from a payload's
//! label to the header field values that must hold when that payload is
//! selected. Layered protocol schemas (IP carrying TCP or UDP) use this to
//! restrict a wrap's option set on parse and to impute header fields the
//! caller didn't set on construction.
//!
//! This is schema-support surface, not something the core wires into every
//! wrap automatically: a schema calls [`BindingTable::header_for`] /
//! [`BindingTable::allowed`] itself, the way `bind_layers` does upstream.

use crate::value::Work;

#[derive(Clone, Debug)]
struct Binding {
    payload_label: &'static str,
    header_fields: Vec<(String, Work)>,
}

/// Bindings attached to one parent format, keyed by payload label.
#[derive(Clone, Debug, Default)]
pub struct BindingTable {
    bindings: Vec<Binding>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that selecting `payload_label` as this parent's payload
    /// requires (and, on construction, imputes) the given header fields.
    pub fn bind(&mut self, payload_label: &'static str, header_fields: Vec<(&str, Work)>) {
        self.bindings.push(Binding {
            payload_label,
            header_fields: header_fields
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        });
    }

    /// Header field values required when `payload_label` is the selected
    /// payload, or `None` if nothing is bound for it.
    pub fn header_for(&self, payload_label: &str) -> Option<&[(String, Work)]> {
        self.bindings
            .iter()
            .find(|b| b.payload_label == payload_label)
            .map(|b| b.header_fields.as_slice())
    }

    /// Labels of payloads this table restricts a wrap's options to.
    pub fn allowed(&self) -> Vec<&'static str> {
        self.bindings.iter().map(|b| b.payload_label).collect()
    }

    /// Whether a header's working values satisfy the binding declared for
    /// `payload_label` (used to pick the binding consistent with a parsed
    /// header, e.g. choosing TCP vs UDP by the IP `proto` field already on
    /// the wire rather than by trial-parsing the payload).
    pub fn matches(&self, payload_label: &str, header: &Work) -> bool {
        match self.header_for(payload_label) {
            Some(fields) => fields
                .iter()
                .all(|(name, want)| header.field(name) == Some(want)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_payload_label_to_header_fields() {
        let mut t = BindingTable::new();
        t.bind("tcp", vec![("proto", Work::Int(6)), ("frag", Work::Int(0))]);
        t.bind("udp", vec![("proto", Work::Int(17)), ("frag", Work::Int(0))]);

        assert_eq!(
            t.header_for("tcp"),
            Some(&[("proto".to_string(), Work::Int(6)), ("frag".to_string(), Work::Int(0))][..])
        );
        assert_eq!(t.allowed(), vec!["tcp", "udp"]);

        let header = Work::Record(vec![
            ("proto".to_string(), Work::Int(6)),
            ("frag".to_string(), Work::Int(0)),
        ]);
        assert!(t.matches("tcp", &header));
        assert!(!t.matches("udp", &header));
    }
}
