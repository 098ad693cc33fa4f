//! Snapshot I/O (spec.md §4.7): serializes the Symbol Table and Sync
//! Registry to a byte stream and restores them, tagged with a four-byte
//! magic. Format is bit-exact with `LogRunner::SaveSymbols`/
//! `RestoreSymbols` in `original_source/parselog/logrunner.cpp`.

use crate::events::ThreadSummary;
use crate::symbol_table::SymbolTable;
use crate::sync_registry::SyncRegistry;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// `symb` interpreted as a little-endian u32, per spec.md §4.7/§6.
pub const SYMBOLS_MAGIC: u32 = 0x626D_7973;

/// Writes the magic, a u32 count, then for each entry a u32 address, a u8
/// name length, and that many bytes of name (truncated to 255 bytes if
/// longer).
pub fn save_symbols<W: Write>(symbols: &SymbolTable, out: &mut W) -> io::Result<()> {
    out.write_all(&SYMBOLS_MAGIC.to_le_bytes())?;
    out.write_all(&(symbols.len() as u32).to_le_bytes())?;
    for (addr, name) in symbols.iter() {
        out.write_all(&addr.to_le_bytes())?;
        let mut bytes = name.as_bytes();
        if bytes.len() > 255 {
            bytes = &bytes[..255];
        }
        out.write_all(&[bytes.len() as u8])?;
        out.write_all(bytes)?;
    }
    Ok(())
}

/// Reads a symbol table snapshot. If the leading u32 doesn't match
/// `SYMBOLS_MAGIC`, seeks back to where it started and returns `Ok(None)`
/// without touching `symbols` (a no-op, per spec.md §4.7/§8).
pub fn restore_symbols<R: Read + Seek>(source: &mut R, symbols: &mut SymbolTable) -> io::Result<bool> {
    let start = source.stream_position()?;
    let mut magic_buf = [0u8; 4];
    if source.read_exact(&mut magic_buf).is_err() {
        source.seek(SeekFrom::Start(start))?;
        return Ok(false);
    }
    let magic = u32::from_le_bytes(magic_buf);
    if magic != SYMBOLS_MAGIC {
        source.seek(SeekFrom::Start(start))?;
        return Ok(false);
    }

    let mut count_buf = [0u8; 4];
    source.read_exact(&mut count_buf)?;
    let count = u32::from_le_bytes(count_buf);

    symbols.clear();
    for _ in 0..count {
        let mut addr_buf = [0u8; 4];
        source.read_exact(&mut addr_buf)?;
        let addr = u32::from_le_bytes(addr_buf);

        let mut len_buf = [0u8; 1];
        source.read_exact(&mut len_buf)?;
        let len = len_buf[0] as usize;

        let mut name_buf = vec![0u8; len];
        source.read_exact(&mut name_buf)?;
        symbols.insert_raw(addr, String::from_utf8_lossy(&name_buf).to_string());
    }
    Ok(true)
}

/// Diagnostic dump of sync registries and thread state, matching
/// `LogRunner::SaveState`'s textual reporting. Not a binary format meant
/// to be read back — it's a human/log-facing diagnostic, same as the
/// original.
pub fn save_state<W: Write>(
    sync: &SyncRegistry,
    summaries: &[ThreadSummary],
    cursor: u32,
    bb_count: u64,
    out: &mut W,
) -> io::Result<()> {
    for (handle, seq) in sync.event_mutex_entries() {
        writeln!(out, "wait_seqs_, {}: {}", handle, seq)?;
    }
    for (handle, seq) in sync.critsec_entries() {
        writeln!(out, "critsec_seqs_, {}: {}", handle, seq)?;
    }
    writeln!(out, "bb_count_: {}", bb_count)?;
    writeln!(out, "it_thread_: {}", cursor)?;
    for s in summaries {
        writeln!(out, "info_threads_, id: {}", s.id)?;
        writeln!(out, "  running: {}", s.running)?;
        writeln!(out, "  finished: {}", s.finished)?;
        writeln!(out, "  bb_count: {}", s.bb_count)?;
    }
    Ok(())
}
