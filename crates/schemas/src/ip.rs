//! IPv4 over TCP or UDP — the layered-protocol reference schema (§4.E).
//!
//! Grounded on `elfesteem.network.inet`: an IPv4 header with computed
//! `ihl`/`len`/`chksum`/`src` leaves (none of which a plain `default` or an
//! equality rule can express, hence `CellType::computed`), wrapping a TCP or
//! UDP segment chosen by the header's `proto` field. The binding between
//! `proto`/`frag` and the payload's label mirrors upstream's `bind_layers`.

use cellcore::{BindingTable, Cell, CellType, Endian, EnumTable, FieldDef, Result, Work};
use lazy_static::lazy_static;

use crate::checksum::checksum16;

pub const PROTO_TCP: i128 = 6;
pub const PROTO_UDP: i128 = 17;

lazy_static! {
    /// IANA protocol numbers used by the `proto` field. A schema-level
    /// registry in the sense of design note §9 "Global registries": built
    /// once, read-only thereafter, never mutated after this initialisation.
    static ref PROTO_TABLE: EnumTable =
        EnumTable::from_pairs([(0, "ip"), (1, "icmp"), (2, "igmp"), (6, "tcp"), (17, "udp")]);
}

fn proto_table() -> EnumTable {
    PROTO_TABLE.clone()
}

/// `IPchecksum.work`: the one's-complement checksum of the header packed
/// with `chksum` itself zeroed.
fn ip_checksum_fn() -> Result<CellType> {
    CellType::int(2)?.computed(std::rc::Rc::new(|leaf: &Cell| {
        let header = leaf
            .parent()
            .ok_or_else(|| cellcore::CellError::Definition("chksum leaf has no parent".into()))?;
        let bytes = header.pack_with_zeroed_field("chksum")?;
        Ok(Work::Int(checksum16(&bytes) as i128))
    }))
}

/// `IPihl._default`: the header's own length in 4-byte words.
fn ip_ihl_fn() -> Result<CellType> {
    CellType::bits(4)?.computed(std::rc::Rc::new(|leaf: &Cell| {
        let header = leaf
            .parent()
            .ok_or_else(|| cellcore::CellError::Definition("ihl leaf has no parent".into()))?;
        Ok(Work::Int((header.packlen().byte_ceil() / 4) as i128))
    }))
}

/// `IPlen.work`: header length plus payload length.
fn ip_len_fn() -> Result<CellType> {
    CellType::int(2)?.computed(std::rc::Rc::new(|leaf: &Cell| {
        let header = leaf
            .parent()
            .ok_or_else(|| cellcore::CellError::Definition("len leaf has no parent".into()))?;
        let packet = header
            .parent()
            .ok_or_else(|| cellcore::CellError::Definition("header has no parent packet".into()))?;
        let payload = packet
            .child_named("payload")
            .ok_or_else(|| cellcore::CellError::Definition("packet has no payload".into()))?;
        let total = header.packlen().byte_ceil() + payload.packlen().byte_ceil();
        Ok(Work::Int(total as i128))
    }))
}

/// `IPaddrSrc.work`: defaults to the destination address until overridden.
fn ip_src_fn() -> CellType {
    CellType::int(4)
        .unwrap()
        .computed(std::rc::Rc::new(|leaf: &Cell| {
            let header = leaf.parent().ok_or_else(|| {
                cellcore::CellError::Definition("src leaf has no parent".into())
            })?;
            let dst = header
                .child_named("dst")
                .ok_or_else(|| cellcore::CellError::Definition("header has no dst field".into()))?;
            dst.work()
                .ok_or_else(|| cellcore::CellError::ValueType("dst has no working value".into()))
        }))
        .expect("int leaf accepts computed")
}

pub fn ip_header_type() -> CellType {
    let fields = vec![
        FieldDef {
            name: "version".into(),
            ty: CellType::bits(4).unwrap().default_value(Work::Int(4)),
            offset: None,
        },
        FieldDef {
            name: "ihl".into(),
            ty: ip_ihl_fn().unwrap(),
            offset: None,
        },
        FieldDef {
            name: "tos".into(),
            ty: CellType::int(1).unwrap().default_value(Work::Int(0)),
            offset: None,
        },
        FieldDef {
            name: "len".into(),
            ty: ip_len_fn().unwrap(),
            offset: None,
        },
        FieldDef {
            name: "id".into(),
            ty: CellType::int(2).unwrap().default_value(Work::Int(1)),
            offset: None,
        },
        FieldDef {
            name: "flags".into(),
            ty: CellType::bits(3).unwrap().default_value(Work::Int(0)),
            offset: None,
        },
        FieldDef {
            name: "frag".into(),
            ty: CellType::bits(13).unwrap().default_value(Work::Int(0)),
            offset: None,
        },
        FieldDef {
            name: "ttl".into(),
            ty: CellType::int(1).unwrap().default_value(Work::Int(64)),
            offset: None,
        },
        FieldDef {
            name: "proto".into(),
            ty: CellType::int(1)
                .unwrap()
                .default_value(Work::Int(0))
                .with_enum(proto_table())
                .unwrap(),
            offset: None,
        },
        FieldDef {
            name: "chksum".into(),
            ty: ip_checksum_fn().unwrap(),
            offset: None,
        },
        FieldDef {
            name: "src".into(),
            ty: ip_src_fn(),
            offset: None,
        },
        FieldDef {
            name: "dst".into(),
            ty: CellType::int(4).unwrap().default_value(Work::Int(0x7f00_0001)),
            offset: None,
        },
    ];
    CellType::record(fields)
        .unwrap()
        .endian(Endian::Big)
        .labelled("ip_header")
}

/// Bindings for IP's payload wrap, mirroring `bind_layers(IP, TCP, frag=0,
/// proto=6)` / `bind_layers(IP, UDP, frag=0, proto=17)`.
pub fn ip_bindings() -> BindingTable {
    let mut t = BindingTable::new();
    t.bind("tcp", vec![("proto", Work::Int(PROTO_TCP)), ("frag", Work::Int(0))]);
    t.bind("udp", vec![("proto", Work::Int(PROTO_UDP)), ("frag", Work::Int(0))]);
    t
}

pub fn packet_type() -> CellType {
    let payload = CellType::wrap(
        vec![crate::tcp::tcp_packet_type(), crate::udp::udp_packet_type()],
        CellType::raw(),
    );
    CellType::record(vec![
        FieldDef {
            name: "header".into(),
            ty: ip_header_type(),
            offset: None,
        },
        FieldDef {
            name: "payload".into(),
            ty: payload,
            offset: None,
        },
    ])
    .unwrap()
    .endian(Endian::Big)
    .labelled("ip_packet")
}

/// Build `IP() / TCP()` carrying `payload` as the TCP segment's data: an
/// empty packet with the IP/TCP binding applied and the payload bytes set,
/// everything else (checksums, lengths, ihl, src) left to be computed on
/// read.
pub fn ip_over_tcp(payload: Vec<u8>) -> Result<Cell> {
    let packet = Cell::empty(packet_type());
    apply_binding(&packet, "tcp")?;
    let payload_wrap = packet.child_named("payload").expect("payload field");
    let tcp_packet = payload_wrap.select_wrap("tcp")?;
    tcp_packet
        .child_named("payload")
        .expect("tcp payload field")
        .unwork(Work::Bytes(payload))?;
    Ok(packet)
}

/// As [`ip_over_tcp`], for a UDP segment.
pub fn ip_over_udp(payload: Vec<u8>) -> Result<Cell> {
    let packet = Cell::empty(packet_type());
    apply_binding(&packet, "udp")?;
    let payload_wrap = packet.child_named("payload").expect("payload field");
    let udp_packet = payload_wrap.select_wrap("udp")?;
    udp_packet
        .child_named("payload")
        .expect("udp payload field")
        .unwork(Work::Bytes(payload))?;
    Ok(packet)
}

fn apply_binding(packet: &Cell, payload_label: &str) -> Result<()> {
    let header = packet.child_named("header").expect("header field");
    if let Some(fields) = ip_bindings().header_for(payload_label) {
        for (name, value) in fields {
            header
                .child_named(name)
                .expect("bound field exists")
                .unwork(value.clone())?;
        }
    }
    Ok(())
}
