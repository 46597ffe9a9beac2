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

pub use sable_err::*;

use std::fmt;

bitflags::bitflags! {
    /// Windows file attribute flags as stored on disk by NTFS and ReFS.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileAttributes: u32 {
        const READ_ONLY = 0x0000_0001;
        const HIDDEN = 0x0000_0002;
        const SYSTEM = 0x0000_0004;
        const DIRECTORY = 0x0000_0010;
        const ARCHIVE = 0x0000_0020;
        const DEVICE = 0x0000_0040;
        const NORMAL = 0x0000_0080;
        const TEMPORARY = 0x0000_0100;
        const SPARSE_FILE = 0x0000_0200;
        const REPARSE_POINT = 0x0000_0400;
        const COMPRESSED = 0x0000_0800;
        const OFFLINE = 0x0000_1000;
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        const ENCRYPTED = 0x0000_4000;
        const VIRTUAL = 0x0001_0000;
    }
}

/// A point in time as a count of 100-nanosecond ticks since
/// 1601-01-01 00:00:00 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FileTime(u64);

impl FileTime {
    /// Ticks between 1601-01-01 and 1970-01-01.
    const UNIX_EPOCH: u64 = 116_444_736_000_000_000;

    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    pub const fn ticks(&self) -> u64 {
        self.0
    }

    /// Seconds relative to 1970-01-01 00:00:00 UTC. Negative for times
    /// before the Unix epoch.
    pub const fn unix_seconds(&self) -> i64 {
        (self.0 as i64 - Self::UNIX_EPOCH as i64) / 10_000_000
    }
}

impl fmt::Display for FileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

/// A name as stored on disk: a sequence of UTF-16 code units.
///
/// The on-disk encoding is little-endian UTF-16 without a terminator.
/// Conversion to UTF-8 validates surrogate pairs; an unpaired half is a
/// conversion error, never silently replaced. Control characters pass
/// through untouched, escaping them is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    units: Vec<u16>,
}

impl Name {
    /// Decodes a little-endian UTF-16 byte run, typically the name bytes of
    /// a directory entry. The byte count has to be even.
    pub fn from_utf16le(data: &[u8]) -> Result<Self> {
        if data.len() % 2 != 0 {
            return Err(Error::new(ConversionError::TruncatedCharacter));
        }
        Ok(Self {
            units: data
                .chunks_exact(2)
                .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
                .collect(),
        })
    }

    /// The raw UTF-16 code units, unvalidated.
    pub fn units(&self) -> &[u16] {
        &self.units
    }

    /// The number of bytes the UTF-8 form occupies, excluding any
    /// terminator. Fails on unpaired surrogates.
    pub fn utf8_size(&self) -> Result<usize> {
        let mut size = 0;
        for unit in char::decode_utf16(self.units.iter().copied()) {
            size += unit
                .map_err(|_| Error::new(ConversionError::UnpairedSurrogate))?
                .len_utf8();
        }
        Ok(size)
    }

    /// Converts to an owned UTF-8 string. Fails on unpaired surrogates.
    pub fn to_utf8(&self) -> Result<String> {
        char::decode_utf16(self.units.iter().copied())
            .collect::<core::result::Result<String, _>>()
            .map_err(|_| Error::new(ConversionError::UnpairedSurrogate))
    }

    /// Copies the UTF-8 form into `buffer` and returns the number of bytes
    /// written.
    pub fn copy_utf8(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        for unit in char::decode_utf16(self.units.iter().copied()) {
            let c = unit.map_err(|_| Error::new(ConversionError::UnpairedSurrogate))?;
            if written + c.len_utf8() > buffer.len() {
                return Err(Error::new(ConversionError::BufferTooSmall));
            }
            c.encode_utf8(&mut buffer[written..]);
            written += c.len_utf8();
        }
        Ok(written)
    }

    /// Copies the UTF-16 code units into `buffer` and returns the number of
    /// units written.
    pub fn copy_utf16(&self, buffer: &mut [u16]) -> Result<usize> {
        if self.units.len() > buffer.len() {
            return Err(Error::new(ConversionError::BufferTooSmall));
        }
        buffer[..self.units.len()].copy_from_slice(&self.units);
        Ok(self.units.len())
    }
}

impl From<&str> for Name {
    fn from(name: &str) -> Self {
        Self {
            units: name.encode_utf16().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips_through_utf8() {
        let name = Name::from("grüße 🦀.txt");
        assert_eq!(name.to_utf8().unwrap(), "grüße 🦀.txt");
        assert_eq!(name.utf8_size().unwrap(), "grüße 🦀.txt".len());

        let bytes: Vec<u8> = name.units().iter().flat_map(|unit| unit.to_le_bytes()).collect();
        assert_eq!(Name::from_utf16le(&bytes).unwrap(), name);
    }

    #[test]
    fn name_preserves_control_characters() {
        let name = Name::from_utf16le(&[0x01, 0x00, 0x7f, 0x00, 0x41, 0x00]).unwrap();
        assert_eq!(name.to_utf8().unwrap(), "\u{1}\u{7f}A");
    }

    #[test]
    fn name_rejects_unpaired_surrogates() {
        // A lone high surrogate, then a regular character.
        let name = Name::from_utf16le(&[0x00, 0xd8, 0x41, 0x00]).unwrap();
        assert_eq!(
            name.to_utf8().unwrap_err().kind(),
            ErrorKind::Conversion(ConversionError::UnpairedSurrogate)
        );
        assert_eq!(
            name.utf8_size().unwrap_err().kind(),
            ErrorKind::Conversion(ConversionError::UnpairedSurrogate)
        );
    }

    #[test]
    fn name_decodes_surrogate_pairs() {
        // U+10400 as the pair d801 dc00.
        let name = Name::from_utf16le(&[0x01, 0xd8, 0x00, 0xdc]).unwrap();
        assert_eq!(name.to_utf8().unwrap(), "\u{10400}");
        assert_eq!(name.utf8_size().unwrap(), 4);
    }

    #[test]
    fn name_rejects_odd_byte_runs() {
        assert_eq!(
            Name::from_utf16le(&[0x41, 0x00, 0x42]).unwrap_err().kind(),
            ErrorKind::Conversion(ConversionError::TruncatedCharacter)
        );
    }

    #[test]
    fn copy_utf8_bounds_checks() {
        let name = Name::from("abc");
        let mut buffer = [0u8; 8];
        assert_eq!(name.copy_utf8(&mut buffer).unwrap(), 3);
        assert_eq!(&buffer[..3], b"abc");

        let mut small = [0u8; 2];
        assert_eq!(
            name.copy_utf8(&mut small).unwrap_err().kind(),
            ErrorKind::Conversion(ConversionError::BufferTooSmall)
        );
    }

    #[test]
    fn copy_utf16_bounds_checks() {
        let name = Name::from("abc");
        let mut buffer = [0u16; 3];
        assert_eq!(name.copy_utf16(&mut buffer).unwrap(), 3);
        assert_eq!(buffer, [0x61, 0x62, 0x63]);

        let mut small = [0u16; 2];
        assert_eq!(
            name.copy_utf16(&mut small).unwrap_err().kind(),
            ErrorKind::Conversion(ConversionError::BufferTooSmall)
        );
    }

    #[test]
    fn file_time_unix_conversion() {
        assert_eq!(FileTime::from_ticks(116_444_736_000_000_000).unix_seconds(), 0);
        assert_eq!(FileTime::from_ticks(116_444_736_010_000_000).unix_seconds(), 1);
        assert_eq!(FileTime::from_ticks(0).unix_seconds(), -11_644_473_600);
    }

    #[test]
    fn file_attributes_from_bits() {
        let attributes = FileAttributes::from_bits_retain(0x0000_0011);
        assert!(attributes.contains(FileAttributes::READ_ONLY));
        assert!(attributes.contains(FileAttributes::DIRECTORY));
        assert!(!attributes.contains(FileAttributes::HIDDEN));
    }
}
