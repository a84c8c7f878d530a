//! UDP datagram header, layered under [`crate::ip`]. Deliberately plainer
//! than TCP's: the reference schema never overrides `len`/`chksum` for UDP,
//! so they stay ordinary defaulted leaves rather than computed ones.

use cellcore::{CellType, Endian, FieldDef, Work};

pub fn udp_header_type() -> CellType {
    CellType::record(vec![
        FieldDef { name: "sport".into(), ty: CellType::int(2).unwrap().default_value(Work::Int(53)), offset: None },
        FieldDef { name: "dport".into(), ty: CellType::int(2).unwrap().default_value(Work::Int(53)), offset: None },
        FieldDef { name: "len".into(), ty: CellType::int(2).unwrap().default_value(Work::Int(8)), offset: None },
        FieldDef { name: "chksum".into(), ty: CellType::int(2).unwrap().default_value(Work::Int(0)), offset: None },
    ])
    .unwrap()
    .endian(Endian::Big)
    .labelled("udp_header")
}

pub fn udp_packet_type() -> CellType {
    CellType::record(vec![
        FieldDef { name: "header".into(), ty: udp_header_type(), offset: None },
        FieldDef { name: "payload".into(), ty: CellType::raw(), offset: None },
    ])
    .unwrap()
    .labelled("udp")
}
