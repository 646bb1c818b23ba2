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

//! The two running checksums the exfat on-disk format relies on: a 16-bit
//! variant for directory entry sets and a 32-bit variant for the boot
//! region. Both fold one byte at a time into a rotated accumulator, so they
//! can be threaded across any number of `update` calls without buffering.

/// Running 16-bit checksum used for directory entry sets.
pub fn sum16(seed: u16, bytes: &[u8]) -> u16 {
    let mut sum = seed;
    for &b in bytes {
        sum = sum.rotate_right(1).wrapping_add(b as u16);
    }
    sum
}

/// Running 32-bit checksum used for the boot region.
pub fn sum32(seed: u32, bytes: &[u8]) -> u32 {
    let mut sum = seed;
    for &b in bytes {
        sum = sum.rotate_right(1).wrapping_add(b as u32);
    }
    sum
}

/// Folds `sum16` over `bytes`, skipping the two checksum bytes at
/// `skip_offset` as if they were zero. This matches how a directory entry
/// set's own SetChecksum field is excluded from its own checksum.
pub fn sum16_skip(seed: u16, bytes: &[u8], skip_offset: usize) -> u16 {
    let mut sum = seed;
    for (i, &b) in bytes.iter().enumerate() {
        let b = if i == skip_offset || i == skip_offset + 1 {
            0
        } else {
            b
        };
        sum = sum.rotate_right(1).wrapping_add(b as u16);
    }
    sum
}

/// Folds `sum32` over `bytes`, skipping any byte whose index falls within one
/// of `skip_ranges` (half-open, `[start, end)`). Used for the boot region's
/// VolumeFlags and PercentInUse fields, which are excluded from the checksum
/// in block 0 only.
pub fn sum32_skip(seed: u32, bytes: &[u8], skip_ranges: &[(usize, usize)]) -> u32 {
    let mut sum = seed;
    for (i, &b) in bytes.iter().enumerate() {
        let skipped = skip_ranges.iter().any(|&(start, end)| i >= start && i < end);
        let b = if skipped { 0 } else { b };
        sum = sum.rotate_right(1).wrapping_add(b as u32);
    }
    sum
}
