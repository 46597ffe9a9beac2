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
    little_endian::{U16, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

use crate::volume_header::VolumeHeader;

/// Size of the header at the start of every metadata block.
pub(crate) const METADATA_BLOCK_HEADER_SIZE: usize = 48;

bitflags::bitflags! {
    /// The node type of a metadata block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct NodeTypeFlags: u8 {
        /// The block is a branch node whose payload lists child blocks.
        const BRANCH = 0x01;
        /// The block is a root node.
        const ROOT = 0x02;
        /// The block is a stream node.
        const STREAM = 0x04;
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct MetadataBlockHeaderLayout {
    /// The block number the block itself claims to live at. A mismatch with
    /// the location the block was read from indicates a misdirected read.
    block_number: U64,
    /// The sequence number, incremented on every copy-on-write update of
    /// the block.
    sequence_number: U64,
    /// The object identifier of the table the block belongs to.
    object_identifier: U64,
    /// The node type flags, see [`NodeTypeFlags`].
    node_type_flags: u8,
    /// Unknown.
    unknown1: u8,
    /// The node record flags. 0x0008 marks records whose value holds an
    /// embedded Ministore node.
    node_record_flags: U16,
    /// Unknown.
    unknown2: [u8; 4],
    /// Unknown.
    unknown3: [u8; 16],
}

/// A metadata block read from disk, header validated, payload untouched.
#[derive(Debug, Clone)]
pub(crate) struct MetadataBlock {
    block_number: u64,
    sequence_number: u64,
    object_identifier: u64,
    node_type_flags: NodeTypeFlags,
    node_record_flags: u16,
    data: Vec<u8>,
}

impl MetadataBlock {
    /// Reads the metadata block at `block_number * metadata_block_size` and
    /// validates its self block number. `level` is the nesting depth within
    /// the metadata hierarchy, it only informs the trace output.
    pub(crate) fn read<DS: DataStorage>(
        data_storage: &DS,
        header: &VolumeHeader,
        block_number: u64,
        level: u32,
    ) -> Result<Self> {
        let metadata_block_size = header.metadata_block_size() as u64;
        let offset = block_number
            .checked_mul(metadata_block_size)
            .ok_or_else(|| {
                error!("Block number {block_number} overflows the volume offset");
                Error::new(InputError::Overflow).frame("read_metadata_block")
            })?;
        if metadata_block_size > header.volume_size()
            || offset > header.volume_size() - metadata_block_size
        {
            error!(
                "Level {level} metadata block {block_number} at offset {offset:#x} lies outside \
                 the volume of {} bytes",
                header.volume_size()
            );
            return Err(Error::new(InputError::OutOfBounds).frame_at(
                "read_metadata_block",
                block_number,
                offset,
            ));
        }
        debug!("Reading level {level} metadata block {block_number} at offset {offset:#x}");

        let mut data = vec![0u8; metadata_block_size as usize];
        data_storage
            .read(offset, &mut data)
            .map_err(|error| error.frame_at("read_metadata_block", block_number, offset))?;
        Self::parse(data, block_number)
            .map_err(|error| error.frame_at("read_metadata_block", block_number, offset))
    }

    fn parse(data: Vec<u8>, expected_block_number: u64) -> Result<Self> {
        let Ok((layout, _)) = MetadataBlockHeaderLayout::ref_from_prefix(&data) else {
            error!(
                "Metadata block of {} bytes is too small for its header",
                data.len()
            );
            return Err(Error::new(InputError::LengthExceedsContainer));
        };

        let block_number = layout.block_number.get();
        if block_number != expected_block_number {
            error!(
                "Metadata block read at block {expected_block_number} declares block number \
                 {block_number}"
            );
            return Err(Error::new(InputError::SelfBlockMismatch));
        }

        let sequence_number = layout.sequence_number.get();
        let object_identifier = layout.object_identifier.get();
        let node_type_flags = NodeTypeFlags::from_bits_retain(layout.node_type_flags);
        let node_record_flags = layout.node_record_flags.get();
        debug!(
            "Metadata block {block_number}: sequence {sequence_number}, object \
             {object_identifier:#x}, type flags {node_type_flags:?}"
        );

        Ok(Self {
            block_number,
            sequence_number,
            object_identifier,
            node_type_flags,
            node_record_flags,
            data,
        })
    }

    pub(crate) fn block_number(&self) -> u64 {
        self.block_number
    }

    pub(crate) fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub(crate) fn object_identifier(&self) -> u64 {
        self.object_identifier
    }

    pub(crate) fn node_type_flags(&self) -> NodeTypeFlags {
        self.node_type_flags
    }

    pub(crate) fn node_record_flags(&self) -> u16 {
        self.node_record_flags
    }

    /// The whole block, header included. Table entry offsets are relative
    /// to this.
    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    /// The block payload behind the header.
    pub(crate) fn payload(&self) -> &[u8] {
        &self.data[METADATA_BLOCK_HEADER_SIZE..]
    }
}

#[cfg(test)]
mod tests {
    use sable_ds::MemoryStorage;
    use sable_fs::ErrorKind;

    use super::*;
    use crate::volume_header::tests::header_fixture;

    fn small_volume_header() -> VolumeHeader {
        // 16 KiB metadata blocks, volume size well past the test blocks.
        let mut data = header_fixture();
        data[24..32].copy_from_slice(&0x8000u64.to_le_bytes());
        VolumeHeader::parse(&data).unwrap()
    }

    fn block_data(block_number: u64, sequence_number: u64, type_flags: u8) -> Vec<u8> {
        let mut data = vec![0u8; 16384];
        data[..8].copy_from_slice(&block_number.to_le_bytes());
        data[8..16].copy_from_slice(&sequence_number.to_le_bytes());
        data[16..24].copy_from_slice(&0xb0b0u64.to_le_bytes());
        data[24] = type_flags;
        data[26..28].copy_from_slice(&0x0008u16.to_le_bytes());
        data
    }

    #[test]
    fn reads_a_block_at_its_cluster_aligned_offset() {
        let header = small_volume_header();
        let mut image = vec![0u8; 3 * 16384];
        image[2 * 16384..].copy_from_slice(&block_data(2, 17, 0x03));
        let storage = MemoryStorage::new(image);

        let block = MetadataBlock::read(&storage, &header, 2, 1).unwrap();
        assert_eq!(block.block_number(), 2);
        assert_eq!(block.sequence_number(), 17);
        assert_eq!(block.object_identifier(), 0xb0b0);
        assert!(block.node_type_flags().contains(NodeTypeFlags::BRANCH));
        assert!(block.node_type_flags().contains(NodeTypeFlags::ROOT));
        assert_eq!(block.node_record_flags(), 0x0008);
        assert_eq!(block.payload().len(), 16384 - METADATA_BLOCK_HEADER_SIZE);
    }

    #[test]
    fn rejects_a_self_block_number_mismatch() {
        let header = small_volume_header();
        let mut image = vec![0u8; 43 * 16384];
        let offset = 42 * 16384;
        image[offset..offset + 16384].copy_from_slice(&block_data(41, 1, 0));
        let storage = MemoryStorage::new(image);

        let error = MetadataBlock::read(&storage, &header, 42, 3).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Input(InputError::SelfBlockMismatch));
        assert_eq!(error.frames()[0].block_number, Some(42));
    }

    #[test]
    fn rejects_blocks_outside_the_volume() {
        let header = small_volume_header();
        let storage = MemoryStorage::new(vec![0u8; 16384]);

        // Within the backing storage of no volume this small.
        assert_eq!(
            MetadataBlock::read(&storage, &header, u64::MAX / 16384, 1)
                .unwrap_err()
                .kind(),
            ErrorKind::Input(InputError::OutOfBounds)
        );
    }

    #[test]
    fn rejects_block_numbers_that_overflow() {
        let header = small_volume_header();
        let storage = MemoryStorage::new(vec![0u8; 16384]);
        assert_eq!(
            MetadataBlock::read(&storage, &header, u64::MAX, 1).unwrap_err().kind(),
            ErrorKind::Input(InputError::Overflow)
        );
    }
}
