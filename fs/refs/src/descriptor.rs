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

use log::{debug, error};
use sable_ds::DataStorage;
use sable_fs::{Error, InputError, Result};
use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

use crate::{
    metadata_block::{MetadataBlock, METADATA_BLOCK_HEADER_SIZE},
    volume_header::VolumeHeader,
};

/// The fixed block number of the level 0 metadata block.
pub(crate) const LEVEL0_BLOCK_NUMBER: u64 = 0x1e;

/// A reference to a child metadata block.
///
/// Level 2 tables additionally tag each child with up to 16 bytes of
/// identifier data describing the child's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockDescriptor {
    pub(crate) block_number: u64,
    /// Opaque tag, meaning unknown.
    pub(crate) tag: u64,
    pub(crate) checksum: u64,
    identifier_data: [u8; 16],
    identifier_data_size: u8,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct DescriptorLayout {
    /// The block number of the referenced metadata block.
    block_number: U64,
    /// Unknown.
    tag: U64,
    /// The checksum of the referenced metadata block. Preserved, not
    /// verified.
    checksum: U64,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct IdentifiedDescriptorLayout {
    descriptor: DescriptorLayout,
    /// The number of identifier data bytes that follow this header.
    ///
    /// The valid range of values for this field is 0 to 16.
    identifier_data_size: U16,
    /// Unknown.
    unknown: [u8; 6],
}

impl BlockDescriptor {
    pub(crate) fn new(block_number: u64, tag: u64, checksum: u64) -> Self {
        Self {
            block_number,
            tag,
            checksum,
            identifier_data: [0; 16],
            identifier_data_size: 0,
        }
    }

    /// Decodes the descriptor at the block-relative `offset`. Offsets
    /// always point behind the metadata block header.
    fn parse(data: &[u8], offset: usize, with_identifier_data: bool) -> Result<Self> {
        if offset < METADATA_BLOCK_HEADER_SIZE {
            error!("Descriptor offset {offset:#x} points into the metadata block header");
            return Err(Error::new(InputError::OutOfBounds));
        }
        let record = data.get(offset..).ok_or_else(|| {
            error!(
                "Descriptor offset {offset:#x} lies outside the metadata block of {} bytes",
                data.len()
            );
            Error::new(InputError::OutOfBounds)
        })?;

        if !with_identifier_data {
            let (layout, _) = DescriptorLayout::read_from_prefix(record)
                .map_err(|_| Error::new(InputError::OutOfBounds))?;
            return Ok(Self {
                block_number: layout.block_number.get(),
                tag: layout.tag.get(),
                checksum: layout.checksum.get(),
                identifier_data: [0; 16],
                identifier_data_size: 0,
            });
        }

        let (layout, identifier_rest) = IdentifiedDescriptorLayout::read_from_prefix(record)
            .map_err(|_| Error::new(InputError::OutOfBounds))?;
        let identifier_data_size = layout.identifier_data_size.get();
        if identifier_data_size > 16 {
            error!("Identifier data size ({identifier_data_size}) shall be at most 16");
            return Err(Error::new(InputError::UnsupportedValue));
        }
        let identifier = identifier_rest
            .get(..identifier_data_size as usize)
            .ok_or_else(|| {
                error!("Identifier data runs past the end of the metadata block");
                Error::new(InputError::OutOfBounds)
            })?;
        let mut identifier_data = [0u8; 16];
        identifier_data[..identifier.len()].copy_from_slice(identifier);

        Ok(Self {
            block_number: layout.descriptor.block_number.get(),
            tag: layout.descriptor.tag.get(),
            checksum: layout.descriptor.checksum.get(),
            identifier_data,
            identifier_data_size: identifier_data_size as u8,
        })
    }

    pub(crate) fn identifier_data(&self) -> &[u8] {
        &self.identifier_data[..self.identifier_data_size as usize]
    }

    /// The role of the referenced block, the upper half of a full 16-byte
    /// identifier. 0x00000600 is the root directory, 0x00000701 a user
    /// directory, everything else is opaque.
    pub(crate) fn role_identifier(&self) -> Option<u64> {
        (self.identifier_data_size == 16).then(|| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&self.identifier_data[8..]);
            u64::from_le_bytes(bytes)
        })
    }

    /// The object identifier of the referenced directory, the lower half of
    /// a full 16-byte identifier.
    pub(crate) fn object_identifier(&self) -> Option<u64> {
        (self.identifier_data_size == 16).then(|| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&self.identifier_data[..8]);
            u64::from_le_bytes(bytes)
        })
    }
}

/// The level 0 metadata, read from the fixed block number 0x1e: the entry
/// points of the two level 1 metadata copies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Level0Metadata {
    pub(crate) primary_level1_block_number: u64,
    pub(crate) secondary_level1_block_number: u64,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct Level0Layout {
    /// The block number of the primary level 1 metadata block.
    primary_level1_block_number: U64,
    /// The block number of the secondary level 1 metadata block.
    secondary_level1_block_number: U64,
}

impl Level0Metadata {
    pub(crate) fn read<DS: DataStorage>(
        data_storage: &DS,
        header: &VolumeHeader,
    ) -> Result<Self> {
        let block = MetadataBlock::read(data_storage, header, LEVEL0_BLOCK_NUMBER, 0)
            .map_err(|error| error.frame("read_level0_metadata"))?;
        let (layout, _) = Level0Layout::ref_from_prefix(block.payload()).map_err(|_| {
            Error::new(InputError::LengthExceedsContainer).frame("read_level0_metadata")
        })?;
        let level0 = Self {
            primary_level1_block_number: layout.primary_level1_block_number.get(),
            secondary_level1_block_number: layout.secondary_level1_block_number.get(),
        };
        debug!(
            "Level 1 metadata blocks: primary {}, secondary {}",
            level0.primary_level1_block_number, level0.secondary_level1_block_number
        );
        Ok(level0)
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct TableHeaderLayout {
    /// Unknown.
    unknown1: [u8; 48],
    /// Unknown.
    unknown2: U32,
    /// Unknown.
    unknown3: U16,
    /// Unknown.
    unknown4: U16,
    /// The block-relative offset of the table's self entry.
    entry_offset: U32,
    /// The size of a table entry in bytes.
    entry_size: U32,
    /// The sequence number of the table. For level 1 metadata this selects
    /// the authoritative copy.
    sequence_number: U64,
    /// Unknown.
    unknown5: U32,
    /// Unknown.
    unknown6: U32,
    /// Unknown.
    unknown7: [u8; 8],
    /// The number of entries in the offset array that follows this header.
    number_of_entries: U32,
}

/// A descriptor table, the shared framing of level 1 and level 2 metadata:
/// a header at the payload start and an array of block-relative entry
/// offsets, each pointing at a [`BlockDescriptor`].
#[derive(Debug, Clone)]
pub(crate) struct DescriptorTable {
    pub(crate) sequence_number: u64,
    pub(crate) entries: Vec<BlockDescriptor>,
}

impl DescriptorTable {
    /// Decodes a level 1 metadata table: plain 24-byte descriptors of level
    /// 2 blocks, with a self entry that has to refer back to the block it
    /// lives in.
    pub(crate) fn read_level1(block: &MetadataBlock) -> Result<Self> {
        let table = Self::parse(block, false)
            .map_err(|error| error.frame_at("read_level1_metadata", block.block_number(), 0))?;

        let self_entry = &table.entries[0];
        if self_entry.block_number != block.block_number() {
            error!(
                "Level 1 self entry names block {}, expected block {}",
                self_entry.block_number,
                block.block_number()
            );
            return Err(Error::new(InputError::SelfBlockMismatch).frame_at(
                "read_level1_metadata",
                block.block_number(),
                0,
            ));
        }
        Ok(Self {
            sequence_number: table.sequence_number,
            entries: table.entries[1..].to_vec(),
        })
    }

    /// Decodes a level 2 metadata table: descriptors of level 3 blocks,
    /// each carrying identifier data, without self reconciliation.
    pub(crate) fn read_level2(block: &MetadataBlock) -> Result<Self> {
        Self::parse(block, true)
            .map_err(|error| error.frame_at("read_level2_metadata", block.block_number(), 0))
    }

    /// Decodes the extent list of a branch directory block: plain
    /// descriptors of the level 4 blocks holding the directory's entries.
    pub(crate) fn read_extent_list(block: &MetadataBlock) -> Result<Self> {
        let table = Self::parse(block, false)
            .map_err(|error| error.frame_at("read_extent_list", block.block_number(), 0))?;
        Ok(Self {
            sequence_number: table.sequence_number,
            entries: table.entries[1..].to_vec(),
        })
    }

    /// Decodes the common table framing. The self entry, where present, is
    /// returned as the first descriptor.
    fn parse(block: &MetadataBlock, with_identifier_data: bool) -> Result<Self> {
        let payload = block.payload();
        let Ok((header, offset_array)) = TableHeaderLayout::ref_from_prefix(payload) else {
            error!("Metadata block payload is too small for a descriptor table");
            return Err(Error::new(InputError::LengthExceedsContainer));
        };

        let number_of_entries = header.number_of_entries.get() as usize;
        let offset_array_size = number_of_entries
            .checked_mul(4)
            .ok_or(InputError::Overflow)?;
        let Some(offset_array) = offset_array.get(..offset_array_size) else {
            error!(
                "Offset array of {number_of_entries} entries overflows the metadata block of {} \
                 bytes",
                block.data().len()
            );
            return Err(Error::new(InputError::LengthExceedsContainer));
        };

        let entry_offset = header.entry_offset.get() as usize;
        let sequence_number = header.sequence_number.get();
        debug!(
            "Descriptor table: sequence {sequence_number}, {number_of_entries} entries, entry \
             size {}, self entry at {entry_offset:#x}",
            header.entry_size.get()
        );

        let mut entries = Vec::with_capacity(number_of_entries + 1);
        if !with_identifier_data {
            entries.push(BlockDescriptor::parse(block.data(), entry_offset, false)?);
        }
        for (entry_index, offset) in offset_array.chunks_exact(4).enumerate() {
            let offset = u32::from_le_bytes([offset[0], offset[1], offset[2], offset[3]]) as usize;
            let descriptor = BlockDescriptor::parse(block.data(), offset, with_identifier_data)?;
            debug!(
                "Entry {entry_index:02}: block {}, tag {:#x}, checksum {:#x}",
                descriptor.block_number, descriptor.tag, descriptor.checksum
            );
            entries.push(descriptor);
        }

        Ok(Self {
            sequence_number,
            entries,
        })
    }
}
