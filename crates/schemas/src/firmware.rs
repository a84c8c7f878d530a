//! Intel Management Engine flash partition table: a fixed header followed
//! by a variable-length array of partition entries, grounded on
//! `elfesteem.file.management_engine`'s `Header`/`FptEntry`/`PartitionTable`.
//!
//! Exercises the two pieces of the engine the IP/TCP schemas don't: a
//! [`cellcore::Rule::Equal`] tying the header's declared entry count to the
//! variable array's own `count`, and a computed header checksum that, unlike
//! IP's one's-complement sum, is the simpler "bytes sum to zero" idiom common
//! in firmware headers.

use std::rc::Rc;

use cellcore::{Cell, CellError, CellType, Endian, FieldDef, Path, Result, Rule, Work};

use crate::checksum::byte_checksum;

/// `Header.Checksum`: chosen so the header's bytes (with `Checksum` itself
/// zeroed) sum to zero modulo 256.
fn fpt_checksum_fn() -> Result<CellType> {
    CellType::int(1)?.computed(Rc::new(|leaf: &Cell| {
        let header = leaf
            .parent()
            .ok_or_else(|| CellError::Definition("Checksum leaf has no parent".into()))?;
        let bytes = header.pack_with_zeroed_field("Checksum")?;
        Ok(Work::Int(byte_checksum(&bytes) as i128))
    }))
}

/// `Header.HeaderLen`: the header's own length in bytes.
fn fpt_header_len_fn() -> Result<CellType> {
    CellType::int(1)?.computed(Rc::new(|leaf: &Cell| {
        let header = leaf
            .parent()
            .ok_or_else(|| CellError::Definition("HeaderLen leaf has no parent".into()))?;
        Ok(Work::Int(header.packlen().byte_ceil() as i128))
    }))
}

pub fn fpt_header_type() -> CellType {
    let fields = vec![
        FieldDef {
            name: "Magic".into(),
            ty: CellType::raw_n(4).default_value(Work::Bytes(b"$FPT".to_vec())),
            offset: None,
        },
        FieldDef {
            name: "NumEntries".into(),
            ty: CellType::int(4)
                .unwrap()
                .with_rules(vec![Rule::Equal(vec![
                    Path::new("NumEntries"),
                    Path::new("entries.count"),
                ])]),
            offset: None,
        },
        FieldDef {
            name: "Version".into(),
            ty: CellType::int(1).unwrap().default_value(Work::Int(0x20)),
            offset: None,
        },
        FieldDef {
            name: "EntryType".into(),
            ty: CellType::int(1).unwrap().default_value(Work::Int(0)),
            offset: None,
        },
        FieldDef {
            name: "HeaderLen".into(),
            ty: fpt_header_len_fn().unwrap(),
            offset: None,
        },
        FieldDef {
            name: "Checksum".into(),
            ty: fpt_checksum_fn().unwrap(),
            offset: None,
        },
        FieldDef {
            name: "FlashCycleLifetime".into(),
            ty: CellType::int(2).unwrap().default_value(Work::Int(0)),
            offset: None,
        },
        FieldDef {
            name: "FlashCycleLimit".into(),
            ty: CellType::int(2).unwrap().default_value(Work::Int(0)),
            offset: None,
        },
        FieldDef {
            name: "UMASize".into(),
            ty: CellType::int(4).unwrap().default_value(Work::Int(0)),
            offset: None,
        },
        FieldDef {
            name: "Flags".into(),
            ty: CellType::int(4).unwrap().default_value(Work::Int(0)),
            offset: None,
        },
        FieldDef {
            name: "unknown".into(),
            ty: CellType::raw_n(8).default_value(Work::Bytes(vec![0u8; 8])),
            offset: None,
        },
    ];
    CellType::record(fields)
        .unwrap()
        .endian(Endian::Little)
        .labelled("fpt_header")
}

pub fn fpt_entry_type() -> CellType {
    CellType::record(vec![
        FieldDef { name: "Name".into(), ty: CellType::raw_n(4).default_value(Work::Bytes(vec![0u8; 4])), offset: None },
        FieldDef { name: "Owner".into(), ty: CellType::raw_n(4).default_value(Work::Bytes(vec![0u8; 4])), offset: None },
        FieldDef { name: "Offset".into(), ty: CellType::int(4).unwrap().default_value(Work::Int(0)), offset: None },
        FieldDef { name: "Size".into(), ty: CellType::int(4).unwrap().default_value(Work::Int(0)), offset: None },
        FieldDef { name: "TokensOnStart".into(), ty: CellType::int(4).unwrap().default_value(Work::Int(0)), offset: None },
        FieldDef { name: "MaxTokens".into(), ty: CellType::int(4).unwrap().default_value(Work::Int(0)), offset: None },
        FieldDef { name: "ScratchSectors".into(), ty: CellType::int(4).unwrap().default_value(Work::Int(0)), offset: None },
        FieldDef { name: "Flags".into(), ty: CellType::int(4).unwrap().default_value(Work::Int(0)), offset: None },
    ])
    .unwrap()
    .endian(Endian::Little)
    .labelled("fpt_entry")
}

pub fn fpt_table_type() -> CellType {
    CellType::record(vec![
        FieldDef { name: "header".into(), ty: fpt_header_type(), offset: None },
        FieldDef { name: "entries".into(), ty: CellType::varwrap(fpt_entry_type()), offset: None },
    ])
    .unwrap()
    .labelled("fpt")
}

/// Build a table from entry name/offset/size triples, leaving `NumEntries`,
/// `HeaderLen` and `Checksum` to be computed/imputed on read.
pub fn fpt_with_entries(entries: &[(&str, u32, u32)]) -> Result<Cell> {
    let table = Cell::empty(fpt_table_type());
    let entries_cell = table.child_named("entries").expect("entries field");
    let items: Vec<Work> = entries
        .iter()
        .map(|(name, offset, size)| {
            let mut padded = name.as_bytes().to_vec();
            padded.resize(4, 0);
            Work::Record(vec![
                ("Name".into(), Work::Bytes(padded)),
                ("Owner".into(), Work::Bytes(vec![0u8; 4])),
                ("Offset".into(), Work::Int(*offset as i128)),
                ("Size".into(), Work::Int(*size as i128)),
                ("TokensOnStart".into(), Work::Int(0)),
                ("MaxTokens".into(), Work::Int(0)),
                ("ScratchSectors".into(), Work::Int(0)),
                ("Flags".into(), Work::Int(0)),
            ])
        })
        .collect();
    entries_cell.unwork(Work::Array(items))?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_entries_is_imputed_from_entry_count() {
        let table = fpt_with_entries(&[("FTPR", 0x1000, 0x2000), ("NFTP", 0x3000, 0x1000)]).unwrap();
        let header = table.child_named("header").unwrap();
        let n = header.child_named("NumEntries").unwrap().work().unwrap().as_int().unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn header_len_reflects_header_byte_length() {
        let table = fpt_with_entries(&[]).unwrap();
        let header = table.child_named("header").unwrap();
        let len = header.child_named("HeaderLen").unwrap().work().unwrap().as_int().unwrap();
        assert_eq!(len, 32);
    }

    #[test]
    fn checksum_makes_header_bytes_sum_to_zero() {
        let table = fpt_with_entries(&[("FTPR", 0x1000, 0x2000)]).unwrap();
        let header = table.child_named("header").unwrap();
        let bytes = header.pack().unwrap().expect("header fully defined");
        let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
        assert_eq!(sum % 256, 0);
    }

    // S8: a table built with 2 entries, reparsed from its packed bytes,
    // recovers exactly 2 entries — the varwrap's own budget is the whole
    // table minus the header, so it is greedy up to that boundary.
    #[test]
    fn reparsing_recovers_the_same_entry_count() {
        let table = fpt_with_entries(&[("FTPR", 0x1000, 0x2000), ("NFTP", 0x3000, 0x1000)]).unwrap();
        let bytes = table.pack().unwrap().expect("fully defined table");

        let reparsed = Cell::unpack(fpt_table_type(), &bytes, 0).unwrap();
        let entries = reparsed.child_named("entries").unwrap();
        assert_eq!(entries.children().len() - 2, 2); // minus the count/packlen virtual children
    }
}
