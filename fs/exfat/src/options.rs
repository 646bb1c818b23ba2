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

//! Mount-option configuration (component N): parses the same comma-separated
//! `uid=`/`gid=`/`fmode=`/`dmode=`/`nls=` token string the original driver's
//! `parse_options` accepted, into an immutable value consumed once at mount.

use exfat_err::{Error, Result};

/// Presentational `uid`/`gid`/mode bits applied to every inode; exFAT itself
/// has no notion of a Unix owner or permission bits.
#[derive(Debug, Clone)]
pub struct ExfatMountOptions {
    pub uid: u32,
    pub gid: u32,
    pub fmode: u32,
    pub dmode: u32,
    pub nls: String,
}

impl Default for ExfatMountOptions {
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            // S_IWUSR | S_IRUGO
            fmode: 0o644,
            // S_IWUSR | S_IRUGO | S_IXUGO
            dmode: 0o755,
            nls: String::new(),
        }
    }
}

impl ExfatMountOptions {
    /// Parses a comma-separated option string such as
    /// `"uid=1000,gid=1000,fmode=0644,dmode=0755,nls=utf8"`. Unknown tokens
    /// and malformed integer/octal values are both rejected, mirroring
    /// `parse_options`'s "unrecognized mount option" diagnostic.
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = Self::default();
        for token in options.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let Some((key, value)) = token.split_once('=') else {
                return Err(Error::InvalidArgument(format!(
                    "mount option '{token}' is missing a value"
                )));
            };
            match key {
                "uid" => parsed.uid = parse_int(token, value)?,
                "gid" => parsed.gid = parse_int(token, value)?,
                "fmode" => parsed.fmode = parse_octal(token, value)?,
                "dmode" => parsed.dmode = parse_octal(token, value)?,
                "nls" => parsed.nls = value.to_string(),
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "unrecognized mount option '{token}'"
                    )))
                }
            }
        }
        Ok(parsed)
    }
}

fn parse_int(token: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid mount option '{token}'")))
}

fn parse_octal(token: &str, value: &str) -> Result<u32> {
    u32::from_str_radix(value, 8)
        .map_err(|_| Error::InvalidArgument(format!("invalid mount option '{token}'")))
}
