// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Decodes the run-length-encoded Up-case Table (component E) into a
//! range-indexed case-folding map, and implements `towupper`.

use log::warn;

use crate::checksum::sum32;

const HOLE_SENTINEL: u16 = 0xFFFF;
const MAX_CODE_POINT: u32 = 0x10000;

struct Range {
    start: u16,
    table: Vec<u16>,
}

/// A decoded Up-case Table. Code points outside every stored range map to
/// themselves.
pub struct UpcaseTable {
    ranges: Vec<Range>,
}

impl UpcaseTable {
    /// An identity table, used when the on-disk table is missing or fails
    /// its checksum: names are then compared byte-for-byte instead of
    /// case-folded, but the mount still succeeds.
    pub fn identity() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Decodes `raw` (the Up-case Table's bytes, as read from its cluster
    /// chain) and verifies it against `expected_checksum`. On a checksum
    /// mismatch this logs a warning and returns the identity table rather
    /// than failing the mount.
    ///
    /// An odd length is a strange-but-survivable size, per the original
    /// driver's `exfat_setup_upcase`: it is truncated down to the nearest
    /// even length rather than rejected outright, and parsing continues
    /// against the truncated buffer. Only a truncated-to-zero or oversized
    /// table falls back to identity.
    pub fn decode(raw: &[u8], expected_checksum: u32) -> Self {
        let raw = &raw[..raw.len() - raw.len() % 2];
        if raw.is_empty() || raw.len() / 2 > MAX_CODE_POINT as usize {
            warn!("up-case table has an invalid size ({} bytes); names will be matched without case folding", raw.len());
            return Self::identity();
        }

        let checksum = sum32(0, raw);
        if checksum != expected_checksum {
            warn!(
                "up-case table checksum mismatch (expected {expected_checksum:#x}, computed {checksum:#x}); \
                 names will be matched without case folding"
            );
            return Self::identity();
        }

        let mut ranges = Vec::new();
        let mut src_start: u32 = 0;
        let mut current: Option<(u16, Vec<u16>)> = None;
        let mut is_hole = false;

        let mut units = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .peekable();
        while let Some(unit) = units.next() {
            if is_hole {
                let skip = unit as u32;
                let src_len = current.as_ref().map_or(0, |(_, table)| table.len() as u32);
                if src_start + src_len + skip >= MAX_CODE_POINT {
                    warn!(
                        "up-case table hole at {src_start:#x} overflows the UCS-2 code space; \
                         names will be matched without case folding"
                    );
                    return Self::identity();
                }
                if let Some((start, table)) = current.take() {
                    src_start += table.len() as u32;
                    ranges.push(Range { start, table });
                }
                src_start += skip;
                is_hole = false;
                continue;
            }

            if unit == HOLE_SENTINEL && units.peek().is_some() {
                is_hole = true;
                continue;
            }

            let entry = current.get_or_insert_with(|| (src_start as u16, Vec::new()));
            entry.1.push(unit);
        }

        if let Some((start, table)) = current {
            ranges.push(Range { start, table });
        }

        ranges.sort_by_key(|r| r.start);
        Self { ranges }
    }

    /// Case-folds a single UCS-2 code unit.
    pub fn towupper(&self, wc: u16) -> u16 {
        for range in &self.ranges {
            if wc < range.start {
                break;
            }
            let end = range.start as u32 + range.table.len() as u32;
            if (wc as u32) < end {
                return range.table[(wc - range.start) as usize];
            }
        }
        wc
    }

    /// Case-folds an entire name, used for hashing and comparison.
    pub fn upcase_name(&self, name: &[u16]) -> Vec<u16> {
        name.iter().map(|&wc| self.towupper(wc)).collect()
    }
}
