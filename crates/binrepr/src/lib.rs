//! `BinRepr`: a sparse, overlap-tolerant byte buffer.
//!
//! This is the packing substrate for `cellcore`: cells write their
//! serialised bytes at computed offsets, possibly out of order, possibly
//! overlapping (a record field rewritten, a bit-field XOR-composed into an
//! already-written byte), and `BinRepr` reconciles all of that into a single
//! dense byte string on demand.
//!
//! Chunks are kept in ascending offset order in an [`OrdMap`], which gives
//! `predecessor`/`successor` lookups the coverage check in [`BinRepr::read`]
//! needs without a linear scan.

use ordmap::OrdMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BinReprError {
    #[error("overlapping chunks at offset {0}")]
    Overlap(usize),
    #[error("missing data at offset {0}")]
    PaddingNeeded(usize),
}

pub type Result<T> = std::result::Result<T, BinReprError>;

/// One offset's append-only write history. `history.last()` is the run
/// currently in effect; earlier entries are retained for round-trip of
/// partially-understood input (see `with_holes` in `cellcore`).
#[derive(Debug, Clone)]
struct Chunk {
    pos: usize,
    history: Vec<Vec<u8>>,
}

impl Chunk {
    fn probe(pos: usize) -> Self {
        Self {
            pos,
            history: Vec::new(),
        }
    }

    fn new(pos: usize, bytes: Vec<u8>) -> Self {
        Self {
            pos,
            history: vec![bytes],
        }
    }

    fn latest(&self) -> &[u8] {
        self.history.last().map(Vec::as_slice).unwrap_or(&[])
    }

    fn end(&self) -> usize {
        self.pos + self.latest().len()
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos
    }
}
impl Eq for Chunk {}
impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pos.cmp(&other.pos)
    }
}

/// A partially-defined byte sequence supporting sparse writes and
/// overlap-aware dense serialisation.
#[derive(Debug, Clone, Default)]
pub struct BinRepr {
    chunks: OrdMap<Chunk>,
}

impl BinRepr {
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk_at(&self, pos: usize) -> Option<&Chunk> {
        self.chunks.find(&Chunk::probe(pos))
    }

    /// The chunk whose latest run covers `pos`, if any. Ties among
    /// overlapping chunks resolve to the one starting closest to (at or
    /// before) `pos` — i.e. the most locally-written data wins.
    fn covering(&self, pos: usize) -> Option<&Chunk> {
        let cand = self.chunks.predecessor(&Chunk::probe(pos))?;
        (pos < cand.end()).then_some(cand)
    }

    fn next_chunk_pos_after(&self, pos: usize) -> Option<usize> {
        self.chunks
            .successor(&Chunk::probe(pos))
            .map(|c| c.pos)
    }

    /// Write `bytes` starting at `pos`.
    pub fn write(&mut self, pos: usize, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.chunk_at(pos).is_some() {
            self.write_at_existing(pos, bytes);
            return;
        }
        if let Some(next_pos) = self.next_chunk_pos_after(pos) {
            if pos + bytes.len() > next_pos {
                let (head, tail) = bytes.split_at(next_pos - pos);
                self.insert_new(pos, head.to_vec());
                self.write(next_pos, tail);
                return;
            }
        }
        self.insert_new(pos, bytes.to_vec());
    }

    fn insert_new(&mut self, pos: usize, bytes: Vec<u8>) {
        self.chunks.insert(Chunk::new(pos, bytes));
    }

    fn write_at_existing(&mut self, pos: usize, bytes: &[u8]) {
        let existing = self.chunk_at(pos).expect("checked by caller").clone();
        if bytes == existing.latest() {
            return;
        }
        self.chunks.remove(&existing);
        let old_len = existing.latest().len();
        let mut history = existing.history;

        if bytes.len() < old_len {
            // Shorter write: the old latest run's tail beyond the new bytes
            // survives as its own chunk, split off at pos+bytes.len().
            let tail = history.last().unwrap()[bytes.len()..].to_vec();
            history.push(bytes.to_vec());
            self.chunks.insert(Chunk { pos, history });
            if !tail.is_empty() {
                self.write(pos + bytes.len(), &tail);
            }
            return;
        }

        history.push(bytes.to_vec());
        let grown_end = pos + bytes.len();
        if let Some(next_pos) = self.next_chunk_pos_after(pos) {
            if grown_end > next_pos {
                let keep = next_pos - pos;
                let tail = history.last().unwrap()[keep..].to_vec();
                *history.last_mut().unwrap() = history.last().unwrap()[..keep].to_vec();
                self.chunks.insert(Chunk { pos, history });
                self.write(next_pos, &tail);
                return;
            }
        }
        self.chunks.insert(Chunk { pos, history });
    }

    /// `write` plus a commit: chunks fully covered by `[start, stop)`
    /// collapse their history down to just the latest run.
    pub fn write_range(&mut self, start: usize, stop: usize, bytes: &[u8]) {
        self.write(start, bytes);
        let covered: Vec<Chunk> = self
            .chunks
            .iterate()
            .filter(|c| c.pos >= start && c.end() <= stop)
            .cloned()
            .collect();
        for c in covered {
            self.chunks.remove(&c);
            let latest = c.latest().to_vec();
            self.chunks.insert(Chunk::new(c.pos, latest));
        }
    }

    /// Byte(s) written at `pos`. `None` if nothing covers it, `Some(&[b])`
    /// for an unambiguous byte, `Some(list)` if the covering chunk still
    /// carries more than one history entry spanning that position.
    pub fn read(&self, pos: usize) -> Option<Vec<u8>> {
        let chunk = self.covering(pos)?;
        let rel = pos - chunk.pos;
        let values: Vec<u8> = chunk
            .history
            .iter()
            .filter(|run| rel < run.len())
            .map(|run| run[rel])
            .collect();
        Some(values)
    }

    /// Exact bytes covering `[start, stop)`.
    ///
    /// `pad` fills positions no chunk covers; without it, a gap is a
    /// [`BinReprError::PaddingNeeded`]. Without `overwrite`, any chunk
    /// spanning the range that still carries more than one history entry
    /// is an unresolved overlap.
    pub fn read_range(
        &self,
        start: usize,
        stop: usize,
        pad: Option<u8>,
        overwrite: bool,
    ) -> Result<Vec<u8>> {
        if !overwrite {
            for c in self.chunks.iterate() {
                if c.pos < stop && c.end() > start && c.history.len() > 1 {
                    return Err(BinReprError::Overlap(c.pos));
                }
            }
        }
        let mut out = Vec::with_capacity(stop.saturating_sub(start));
        for pos in start..stop {
            match self.covering(pos) {
                Some(chunk) => out.push(chunk.latest()[pos - chunk.pos]),
                None => match pad {
                    Some(p) => out.push(p),
                    None => return Err(BinReprError::PaddingNeeded(pos)),
                },
            }
        }
        Ok(out)
    }

    /// Dense serialisation of the whole buffer, `[0, bytelen())`.
    pub fn pack(&self, pad: Option<u8>, overwrite: bool) -> Result<Vec<u8>> {
        self.read_range(0, self.bytelen(), pad, overwrite)
    }

    /// `max(pos + len(latest_run))` over all chunks; 0 if empty.
    pub fn bytelen(&self) -> usize {
        self.chunks.iterate().map(Chunk::end).max().unwrap_or(0)
    }

    /// XOR `other`'s packed bytes into `self` starting at `offset`,
    /// treating unwritten bytes on both sides as zero.
    pub fn xor(&mut self, other: &BinRepr, offset: usize) {
        let other_bytes = other
            .pack(Some(0), true)
            .unwrap_or_else(|_| unreachable!("pad supplied"));
        for (i, &b) in other_bytes.iter().enumerate() {
            let pos = offset + i;
            let existing = self.read(pos).and_then(|v| v.last().copied()).unwrap_or(0);
            self.write(pos, &[existing ^ b]);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, b"ab".to_vec(), 2)]
    #[case(3, b"xyz".to_vec(), 6)]
    #[case(10, b"x".to_vec(), 11)]
    fn bytelen_tracks_the_furthest_written_position(
        #[case] pos: usize,
        #[case] bytes: Vec<u8>,
        #[case] expected: usize,
    ) {
        let mut b = BinRepr::new();
        b.write(pos, &bytes);
        assert_eq!(b.bytelen(), expected);
    }

    #[test]
    fn round_trip_without_overlap() {
        // property 2
        let mut b = BinRepr::new();
        b.write(0, b"ab");
        b.write(5, b"xy");
        let out = b.read_range(0, 7, Some(b'.'), false).unwrap();
        assert_eq!(out, b"ab...xy");
    }

    #[test]
    fn s6_overwrite_collapses_dense_bytes() {
        // S6: write "ab" at 1, write "vv" over [0,2) -> dense bytes v v b
        let mut b = BinRepr::new();
        b.write(1, b"ab");
        b.write_range(0, 2, b"vv");
        let out = b.pack(Some(b'.'), true).unwrap();
        assert_eq!(hex::encode(&out), "767662");
    }

    #[test]
    fn identical_rewrite_is_noop() {
        let mut b = BinRepr::new();
        b.write(0, b"ab");
        b.write(0, b"ab");
        let chunk_history_len = {
            let c = b.chunk_at(0).unwrap();
            c.history.len()
        };
        assert_eq!(chunk_history_len, 1);
    }

    #[test]
    fn shorter_rewrite_splits_off_surviving_tail() {
        let mut b = BinRepr::new();
        b.write(0, b"abcd");
        b.write(0, b"xy");
        assert_eq!(b.bytelen(), 4);
        assert_eq!(b.pack(None, true).unwrap(), b"xycd");
    }

    #[test]
    fn longer_rewrite_crossing_next_chunk_recurses() {
        let mut b = BinRepr::new();
        b.write(0, b"ab");
        b.write(2, b"cd");
        b.write(0, b"WXYZ"); // grows into the chunk at offset 2
        assert_eq!(b.pack(None, true).unwrap(), b"WXYZ");
    }

    #[test]
    fn overlap_without_overwrite_errors() {
        let mut b = BinRepr::new();
        b.write(0, b"abcd");
        b.write(0, b"xy"); // shrinks; keeps 2 history entries
        let err = b.read_range(0, 2, None, false).unwrap_err();
        assert_eq!(err, BinReprError::Overlap(0));
    }

    #[test]
    fn missing_padding_errors() {
        let b = BinRepr::new();
        let err = b.read_range(0, 1, None, false).unwrap_err();
        assert_eq!(err, BinReprError::PaddingNeeded(0));
    }

    #[test]
    fn xor_composes_bitfield_bytes() {
        let mut base = BinRepr::new();
        base.write(0, &[0b1111_0000]);
        let mut overlay = BinRepr::new();
        overlay.write(0, &[0b0000_1010]);
        base.xor(&overlay, 0);
        assert_eq!(base.pack(None, true).unwrap(), vec![0b1111_1010]);
    }

    #[test]
    fn read_returns_none_for_unwritten_position() {
        let b = BinRepr::new();
        assert_eq!(b.read(0), None);
    }

    #[test]
    fn read_returns_single_value_when_unambiguous() {
        let mut b = BinRepr::new();
        b.write(0, b"a");
        assert_eq!(b.read(0), Some(vec![b'a']));
    }
}
