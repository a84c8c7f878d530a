//! Reference wire-format schemas built on `cellcore`: an IPv4 header
//! layered over TCP or UDP, and an Intel Management Engine flash partition
//! table. Both are grounded on `elfesteem`'s format definitions and exist
//! to exercise the engine's less common corners — computed leaves, explicit
//! wrap selection, and the rule engine's equality imputation — the way a
//! real caller would, not as synthetic unit fixtures.

pub mod checksum;
pub mod firmware;
pub mod ip;
pub mod tcp;
pub mod udp;
