//! TCP segment header, layered under [`crate::ip`].

use std::rc::Rc;

use cellcore::{Cell, CellError, CellType, Endian, FieldDef, Result, Work};

use crate::checksum::checksum16;

/// `TCPchecksum.work`: checksum over a pseudo-header (source/destination
/// address, protocol, segment length) plus the TCP header (with `chksum`
/// zeroed) plus the payload. `phlen` is computed exactly as the reference
/// schema does — the IP header's length plus the TCP *payload*'s length,
/// not the TCP header's — see `DESIGN.md` for why that's kept as-is rather
/// than "corrected".
fn tcp_checksum_fn() -> Result<CellType> {
    CellType::int(2)?.computed(Rc::new(|leaf: &Cell| {
        let tcp_header = leaf
            .parent()
            .ok_or_else(|| CellError::Definition("tcp chksum leaf has no parent".into()))?;
        let tcp_packet = tcp_header
            .parent()
            .ok_or_else(|| CellError::Definition("tcp header has no parent packet".into()))?;
        let wrap_cell = tcp_packet
            .parent()
            .ok_or_else(|| CellError::Definition("tcp packet has no parent wrap".into()))?;
        let ip_packet = wrap_cell
            .parent()
            .ok_or_else(|| CellError::Definition("no underlying IP packet".into()))?;
        let ip_header = ip_packet
            .child_named("header")
            .ok_or_else(|| CellError::Definition("IP packet has no header".into()))?;
        let tcp_payload = tcp_packet
            .child_named("payload")
            .ok_or_else(|| CellError::Definition("tcp packet has no payload".into()))?;

        let field_int = |name: &str| -> Result<i128> {
            ip_header
                .child_named(name)
                .and_then(|c| c.work())
                .ok_or_else(|| CellError::Definition(format!("IP header missing {name}")))?
                .as_int()
        };
        let src = field_int("src")?;
        let dst = field_int("dst")?;
        let proto = field_int("proto")?;
        let phlen = ip_header.packlen().byte_ceil() + tcp_payload.packlen().byte_ceil();

        let mut pseudo = Vec::with_capacity(12);
        pseudo.extend(cellcore::leaf::encode_int(src, 4, Endian::Big));
        pseudo.extend(cellcore::leaf::encode_int(dst, 4, Endian::Big));
        pseudo.push(0);
        pseudo.extend(cellcore::leaf::encode_int(proto, 1, Endian::Big));
        pseudo.extend(cellcore::leaf::encode_int(phlen as i128, 2, Endian::Big));

        let header_bytes = tcp_header.pack_with_zeroed_field("chksum")?;
        let payload_bytes = tcp_payload
            .work()
            .and_then(|w| w.as_bytes().ok().map(<[u8]>::to_vec))
            .unwrap_or_default();

        let mut full = pseudo;
        full.extend(header_bytes);
        full.extend(payload_bytes);
        Ok(Work::Int(checksum16(&full) as i128))
    }))
}

pub fn tcp_header_type() -> CellType {
    CellType::record(vec![
        FieldDef { name: "sport".into(), ty: CellType::int(2).unwrap().default_value(Work::Int(20)), offset: None },
        FieldDef { name: "dport".into(), ty: CellType::int(2).unwrap().default_value(Work::Int(80)), offset: None },
        FieldDef { name: "seq".into(), ty: CellType::int(4).unwrap().default_value(Work::Int(0)), offset: None },
        FieldDef { name: "ack".into(), ty: CellType::int(4).unwrap().default_value(Work::Int(0)), offset: None },
        FieldDef { name: "dataofs".into(), ty: CellType::bits(4).unwrap().default_value(Work::Int(5)), offset: None },
        FieldDef { name: "reserved".into(), ty: CellType::bits(3).unwrap().default_value(Work::Int(0)), offset: None },
        FieldDef { name: "flags".into(), ty: CellType::bits(9).unwrap().default_value(Work::Int(2)), offset: None },
        FieldDef { name: "window".into(), ty: CellType::int(2).unwrap().default_value(Work::Int(8192)), offset: None },
        FieldDef { name: "chksum".into(), ty: tcp_checksum_fn().unwrap(), offset: None },
        FieldDef { name: "urgptr".into(), ty: CellType::int(2).unwrap().default_value(Work::Int(0)), offset: None },
    ])
    .unwrap()
    .endian(Endian::Big)
    .labelled("tcp_header")
}

pub fn tcp_packet_type() -> CellType {
    CellType::record(vec![
        FieldDef { name: "header".into(), ty: tcp_header_type(), offset: None },
        FieldDef { name: "payload".into(), ty: CellType::raw(), offset: None },
    ])
    .unwrap()
    .labelled("tcp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::ip_over_tcp;

    // dataofs(4)/reserved(3)/flags(9) pack into the header's 13th/14th
    // bytes; a broken bit-field codec would desync the reparsed header from
    // the one that was packed.
    #[test]
    fn header_bitfields_round_trip_through_pack_and_reparse() {
        let packet = ip_over_tcp(b"payload".to_vec()).unwrap();
        let bytes = packet.pack().unwrap().expect("fully defined packet");
        let reparsed = Cell::unpack(crate::ip::packet_type(), &bytes, 0).unwrap();

        let header = reparsed
            .child_named("payload")
            .unwrap()
            .child_named("value")
            .unwrap()
            .child_named("header")
            .unwrap();
        assert_eq!(header.child_named("dataofs").unwrap().work().unwrap().as_int().unwrap(), 5);
        assert_eq!(header.child_named("reserved").unwrap().work().unwrap().as_int().unwrap(), 0);
        assert_eq!(header.child_named("flags").unwrap().work().unwrap().as_int().unwrap(), 2);
    }

    #[test]
    fn checksum_changes_when_payload_changes() {
        let a = ip_over_tcp(b"one".to_vec()).unwrap();
        let b = ip_over_tcp(b"two-bytes".to_vec()).unwrap();
        let a_header = a.child_named("header").unwrap();
        let b_header = b.child_named("header").unwrap();
        let tcp_a = a.child_named("payload").unwrap().child_named("value").unwrap();
        let tcp_b = b.child_named("payload").unwrap().child_named("value").unwrap();
        let chk_a = tcp_a.child_named("header").unwrap().child_named("chksum").unwrap().work().unwrap();
        let chk_b = tcp_b.child_named("header").unwrap().child_named("chksum").unwrap().work().unwrap();
        assert_ne!(chk_a, chk_b);
        // sanity: the IP-level length field tracks the payload too.
        assert_ne!(
            a_header.child_named("len").unwrap().work().unwrap(),
            b_header.child_named("len").unwrap().work().unwrap()
        );
    }
}
