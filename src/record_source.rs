//! Per-thread byte-stream record source (spec.md §4.1). Reads a trace file
//! in block-aligned chunks and exposes a `peek`/`fetch` pair: `peek` looks
//! at the next record's tag without consuming it, `fetch` consumes one
//! record and reports the new absolute file offset. A truncated final
//! record is treated as EOF, discarding the already-buffered partial
//! prefix, matching the "out of scope" raw packet reader's documented
//! behavior in spec.md §1.

use crate::record::{self, Record};
use std::fs::File;
use std::io::{Read, Result as IoResult};

const CHUNK_SIZE: usize = 1 << 16;

/// A lazy sequence of fixed-size, tagged records read from one trace file.
pub struct RecordSource {
    file: Option<File>,
    buf: Vec<u8>,
    /// Offset into `buf` of the first not-yet-consumed byte.
    cursor: usize,
    /// Absolute file offset corresponding to `buf[cursor]`.
    base_offset: u64,
    eof: bool,
}

impl RecordSource {
    /// An unopened source; `peek`/`fetch` behave as if at EOF.
    pub fn closed() -> RecordSource {
        RecordSource { file: None, buf: Vec::new(), cursor: 0, base_offset: 0, eof: true }
    }

    pub fn open(path: &str) -> IoResult<RecordSource> {
        let file = File::open(path)?;
        Ok(RecordSource { file: Some(file), buf: Vec::new(), cursor: 0, base_offset: 0, eof: false })
    }

    /// Ensures at least `needed` unread bytes are buffered, or as many as
    /// remain in the file if fewer are available. Reads happen in
    /// `CHUNK_SIZE`-aligned batches so `peek`/`fetch` work across chunk
    /// boundaries transparently.
    fn ensure_buffered(&mut self, needed: usize) {
        if self.eof {
            return;
        }
        while self.buf.len() - self.cursor < needed {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let file = match &mut self.file {
                Some(f) => f,
                None => {
                    self.eof = true;
                    return;
                }
            };
            let n = file.read(&mut chunk).unwrap_or(0);
            if n == 0 {
                self.eof = true;
                return;
            }
            chunk.truncate(n);
            if self.cursor > 0 {
                self.base_offset += self.cursor as u64;
                self.buf.drain(..self.cursor);
                self.cursor = 0;
            }
            self.buf.extend_from_slice(&chunk);
        }
    }

    /// Returns the tag of the next record without consuming it, or `None`
    /// at EOF (including when the final record on disk is truncated).
    pub fn peek(&mut self) -> Option<u32> {
        self.ensure_buffered(4);
        if self.buf.len() - self.cursor < 4 {
            return None;
        }
        let tag = u32::from_le_bytes([
            self.buf[self.cursor],
            self.buf[self.cursor + 1],
            self.buf[self.cursor + 2],
            self.buf[self.cursor + 3],
        ]);
        Some(tag)
    }

    /// Consumes one record, returning it along with the new absolute file
    /// offset just past it. Returns `None` at EOF or on a truncated final
    /// record (the partial prefix already read is discarded, per
    /// spec.md §4.1's edge-case policy).
    pub fn fetch(&mut self) -> Option<(Record, u64)> {
        let tag = self.peek()?;
        let len = record::record_len(tag).unwrap_or_else(|| {
            fatal!("unknown tag {:#x} ({})", tag, record::tag_mnemonic(tag));
        });
        self.ensure_buffered(len);
        if self.buf.len() - self.cursor < len {
            // Truncated final record: treat as EOF.
            self.eof = true;
            return None;
        }
        let bytes = &self.buf[self.cursor..self.cursor + len];
        let record = record::decode(tag, bytes);
        self.cursor += len;
        self.base_offset += len as u64;
        let new_offset = self.base_offset;
        Some((record, new_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{TAG_BB, TAG_LIB_CALL};
    use std::io::Write;

    fn write_bb(out: &mut Vec<u8>, pc: u32) {
        out.extend_from_slice(&TAG_BB.to_le_bytes());
        out.extend_from_slice(&pc.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
    }

    fn write_lib_call(out: &mut Vec<u8>, func: u32, ret_addr: u32, arg: u32) {
        out.extend_from_slice(&TAG_LIB_CALL.to_le_bytes());
        out.extend_from_slice(&func.to_le_bytes());
        out.extend_from_slice(&ret_addr.to_le_bytes());
        out.extend_from_slice(&arg.to_le_bytes());
    }

    fn tmp_file(bytes: &[u8]) -> String {
        let path = std::env::temp_dir().join(format!("bbreplay-test-{:p}", bytes));
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn peek_then_fetch_same_record() {
        let mut bytes = Vec::new();
        write_bb(&mut bytes, 0x1234);
        let path = tmp_file(&bytes);
        let mut src = RecordSource::open(&path).unwrap();
        assert_eq!(src.peek(), Some(TAG_BB));
        let (record, offset) = src.fetch().unwrap();
        assert_eq!(offset, bytes.len() as u64);
        match record {
            Record::Bb { pc } => assert_eq!(pc, 0x1234),
            _ => panic!("expected Bb"),
        }
    }

    #[test]
    fn fetch_across_multiple_records() {
        let mut bytes = Vec::new();
        write_bb(&mut bytes, 1);
        write_lib_call(&mut bytes, 0xA, 0xB, 7);
        let path = tmp_file(&bytes);
        let mut src = RecordSource::open(&path).unwrap();
        assert!(matches!(src.fetch().unwrap().0, Record::Bb { .. }));
        assert!(matches!(src.fetch().unwrap().0, Record::LibCall { .. }));
        assert!(src.fetch().is_none());
    }

    #[test]
    fn truncated_final_record_is_eof() {
        let mut bytes = Vec::new();
        write_bb(&mut bytes, 1);
        bytes.extend_from_slice(&TAG_BB.to_le_bytes());
        bytes.push(0); // 1 of 8 remaining payload bytes: truncated
        let path = tmp_file(&bytes);
        let mut src = RecordSource::open(&path).unwrap();
        assert!(matches!(src.fetch().unwrap().0, Record::Bb { .. }));
        assert!(src.fetch().is_none());
    }

    #[test]
    fn empty_file_is_immediately_eof() {
        let path = tmp_file(&[]);
        let mut src = RecordSource::open(&path).unwrap();
        assert_eq!(src.peek(), None);
        assert!(src.fetch().is_none());
    }
}
