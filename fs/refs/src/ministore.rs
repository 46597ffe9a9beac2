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

use std::ops::Range;

use log::error;
use sable_fs::{Error, InputError, Result};
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

/// Size of the page header at the start of every Ministore node.
pub(crate) const NODE_HEADER_SIZE: usize = 32;

/// Size of the header at the start of every record.
pub(crate) const RECORD_HEADER_SIZE: usize = 16;

bitflags::bitflags! {
    /// Per-record flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct RecordFlags: u16 {
        /// The record value is itself a Ministore node.
        const EMBEDDED_MINISTORE_NODE = 0x0008;
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct NodeHeaderLayout {
    /// The size of the node in bytes, header included.
    node_size: U32,
    /// The number of entries in the offset table behind this header.
    number_of_entries: U32,
    /// The free space watermark: the node-relative offset behind the last
    /// used record byte.
    free_space_offset: U32,
    /// Unknown.
    unknown1: U32,
    /// Unknown.
    unknown2: [u8; 16],
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct RecordHeaderLayout {
    /// The size of the record in bytes, header included.
    record_size: U32,
    /// The record-relative offset of the key.
    key_offset: U16,
    /// The size of the key in bytes.
    key_size: U16,
    /// The record flags, see [`RecordFlags`].
    flags: U16,
    /// The record-relative offset of the value.
    value_offset: U16,
    /// The size of the value in bytes.
    value_size: U16,
    /// Unknown.
    unknown: U16,
}

#[derive(Debug, Clone)]
struct Record {
    key: Range<usize>,
    value: Range<usize>,
    flags: RecordFlags,
    embedded_node: Option<Box<MinistoreNode>>,
}

/// A decoded record: a binary key, a binary value, and, for records flagged
/// accordingly, the value re-parsed as an embedded node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordRef<'a> {
    pub(crate) key: &'a [u8],
    pub(crate) value: &'a [u8],
    pub(crate) flags: RecordFlags,
    pub(crate) embedded_node: Option<&'a MinistoreNode>,
}

/// A Ministore node: the generic ordered key/value block ReFS uses for
/// directories, object tables and attribute tables.
///
/// Parsing validates the format invariants up front: every offset lies
/// strictly within the node, keys and values fit their record, keys are
/// strictly increasing under lexicographic byte order, and exactly the
/// declared number of records is consumed. Embedded nodes are parsed
/// recursively against their value slice only, outer offsets are never
/// reused inside.
#[derive(Debug, Clone)]
pub(crate) struct MinistoreNode {
    data: Vec<u8>,
    records: Vec<Record>,
    free_space_offset: u32,
}

impl MinistoreNode {
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let Ok((header, _)) = NodeHeaderLayout::ref_from_prefix(data) else {
            error!("Data of {} bytes is too small for a node header", data.len());
            return Err(Error::new(InputError::LengthExceedsContainer));
        };

        let node_size = header.node_size.get() as usize;
        if node_size < NODE_HEADER_SIZE || node_size as u64 > data.len() as u64 {
            error!(
                "Node size ({node_size}) shall lie between {NODE_HEADER_SIZE} and the container \
                 size ({})",
                data.len()
            );
            return Err(Error::new(InputError::LengthExceedsContainer));
        }
        let data = &data[..node_size];

        let number_of_entries = header.number_of_entries.get() as usize;
        let table_end = number_of_entries
            .checked_mul(4)
            .and_then(|size| size.checked_add(NODE_HEADER_SIZE))
            .filter(|&end| end <= node_size)
            .ok_or_else(|| {
                error!("Offset table of {number_of_entries} entries overflows the node");
                Error::new(InputError::LengthExceedsContainer)
            })?;

        let free_space_offset = header.free_space_offset.get();
        if (free_space_offset as usize) < table_end || free_space_offset as usize > node_size {
            error!(
                "Free space offset ({free_space_offset}) shall lie between {table_end} and \
                 {node_size}"
            );
            return Err(Error::new(InputError::OutOfBounds));
        }

        let mut records = Vec::with_capacity(number_of_entries);
        let mut previous_key: Option<Range<usize>> = None;
        for chunk in data[NODE_HEADER_SIZE..table_end].chunks_exact(4) {
            let offset = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
            if offset < table_end || offset + RECORD_HEADER_SIZE > node_size {
                error!("Record offset {offset:#x} lies outside the node");
                return Err(Error::new(InputError::OutOfBounds));
            }
            let (record_header, _) = RecordHeaderLayout::read_from_prefix(&data[offset..])
                .map_err(|_| Error::new(InputError::OutOfBounds))?;

            let record_size = record_header.record_size.get() as usize;
            if record_size < RECORD_HEADER_SIZE || offset + record_size > node_size {
                error!("Record size ({record_size}) at offset {offset:#x} overflows the node");
                return Err(Error::new(InputError::LengthExceedsContainer));
            }

            let key_offset = record_header.key_offset.get() as usize;
            let key_size = record_header.key_size.get() as usize;
            let value_offset = record_header.value_offset.get() as usize;
            let value_size = record_header.value_size.get() as usize;
            if key_offset < RECORD_HEADER_SIZE || value_offset < RECORD_HEADER_SIZE {
                error!("Key and value shall lie behind the record header");
                return Err(Error::new(InputError::OutOfBounds));
            }
            if key_offset + key_size > record_size
                || value_offset + value_size > record_size
                || RECORD_HEADER_SIZE + key_size + value_size > record_size
            {
                error!(
                    "Key ({key_size} bytes) and value ({value_size} bytes) shall fit the record \
                     of {record_size} bytes"
                );
                return Err(Error::new(InputError::LengthExceedsContainer));
            }

            let key = offset + key_offset..offset + key_offset + key_size;
            let value = offset + value_offset..offset + value_offset + value_size;
            if let Some(previous) = &previous_key {
                if &data[key.clone()] <= &data[previous.clone()] {
                    error!("Record keys shall be strictly increasing");
                    return Err(Error::new(InputError::KeyOrder));
                }
            }
            previous_key = Some(key.clone());

            let flags = RecordFlags::from_bits_retain(record_header.flags.get());
            let embedded_node = if flags.contains(RecordFlags::EMBEDDED_MINISTORE_NODE) {
                Some(Box::new(
                    Self::parse(&data[value.clone()])
                        .map_err(|error| error.frame("parse_embedded_node"))?,
                ))
            } else {
                None
            };

            records.push(Record {
                key,
                value,
                flags,
                embedded_node,
            });
        }

        Ok(Self {
            data: data.to_vec(),
            records,
            free_space_offset,
        })
    }

    pub(crate) fn number_of_records(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn record(&self, index: usize) -> Option<RecordRef<'_>> {
        self.records.get(index).map(|record| RecordRef {
            key: &self.data[record.key.clone()],
            value: &self.data[record.value.clone()],
            flags: record.flags,
            embedded_node: record.embedded_node.as_deref(),
        })
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = RecordRef<'_>> {
        (0..self.records.len()).filter_map(|index| self.record(index))
    }

    pub(crate) fn free_space_offset(&self) -> u32 {
        self.free_space_offset
    }
}
