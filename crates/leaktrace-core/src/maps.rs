//! `/proc/<pid>/maps` parsing.
//!
//! Each line has the form
//! `start-end perms offset dev inode [path]`, with addresses and offset in
//! hex. Only the fields the symbolizer needs are kept.

use std::io::BufRead;

/// One line of the memory-mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub executable: bool,
    /// File offset of `start`.
    pub offset: u64,
    /// Backing object, empty for anonymous mappings.
    pub path: String,
}

impl MapEntry {
    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }

    /// File offset corresponding to `addr` inside this mapping.
    pub fn file_offset_of(&self, addr: u64) -> u64 {
        addr - self.start + self.offset
    }
}

/// Parse one maps line. Malformed lines yield `None`.
pub fn parse_maps_line(line: &str) -> Option<MapEntry> {
    let mut fields = line.split_ascii_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?.as_bytes();
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    // Paths may contain spaces; keep everything after the inode column.
    let path = fields.collect::<Vec<_>>().join(" ");

    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let offset = u64::from_str_radix(offset, 16).ok()?;
    if perms.len() < 3 || start > end {
        return None;
    }

    Some(MapEntry {
        start,
        end,
        readable: perms[0] == b'r',
        executable: perms[2] == b'x',
        offset,
        path,
    })
}

/// Find the readable, executable mapping whose range holds `pc`.
///
/// Read errors end the scan with no result.
pub fn find_executable_mapping(reader: impl BufRead, pc: u64) -> Option<MapEntry> {
    reader
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| parse_maps_line(&line))
        .find(|entry| entry.readable && entry.executable && entry.contains(pc))
}
