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

//! Synthetic ReFS volume images for the integration tests.
//!
//! The images use 512-byte sectors, 8 sectors per cluster block and format
//! version 1.2, so metadata blocks are 16 KiB. Block numbers address
//! metadata blocks.

use sable_ds::MemoryStorage;

/// The metadata block size of the test geometry.
pub const METADATA_BLOCK_SIZE: usize = 16 * 1024;

/// Size of the header at the start of every metadata block.
pub const BLOCK_HEADER_SIZE: usize = 48;

// Block-relative offsets of the descriptor table fields.
const TABLE_ENTRY_OFFSET: usize = BLOCK_HEADER_SIZE + 56;
const TABLE_ENTRY_SIZE: usize = BLOCK_HEADER_SIZE + 60;
const TABLE_SEQUENCE_NUMBER: usize = BLOCK_HEADER_SIZE + 64;
const TABLE_NUMBER_OF_ENTRIES: usize = BLOCK_HEADER_SIZE + 88;
const TABLE_OFFSET_ARRAY: usize = BLOCK_HEADER_SIZE + 92;

pub const NODE_TYPE_BRANCH: u8 = 0x01;
pub const NODE_TYPE_ROOT: u8 = 0x02;

pub const ROOT_DIRECTORY_IDENTIFIER: u64 = 0x0000_0600;
pub const USER_DIRECTORY_IDENTIFIER: u64 = 0x0000_0701;

pub const TAG_ATTRIBUTE: u8 = 0x10;
pub const TAG_DIRECTORY: u8 = 0x30;
pub const TAG_FILE: u8 = 0x40;

pub fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

/// The 512-byte volume header of the reference fixture: 512-byte sectors,
/// 0x80 sectors per block, version 1.2, 0x1e0000 sectors.
pub fn reference_header() -> [u8; 512] {
    let mut data = [0u8; 512];
    data[..64].copy_from_slice(&[
        0x00, 0x00, 0x00, 0x52, 0x65, 0x46, 0x53, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x46, 0x53, 0x52, 0x53, 0x00, 0x02, 0x07, 0x34, 0x00, 0x00, 0x1e, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x0a,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x45, 0x64, 0x20,
        0x65, 0x64, 0x20, 0x5e,
    ]);
    data
}

/// Key of a sub-directory entry record.
pub fn directory_key(name: &str) -> Vec<u8> {
    let mut key = vec![TAG_DIRECTORY, 0];
    key.extend(utf16le(name));
    key
}

/// Key of a file entry record.
pub fn file_key(name: &str) -> Vec<u8> {
    let mut key = vec![TAG_FILE, 0];
    key.extend(utf16le(name));
    key
}

/// Key of the volume name attribute record.
pub fn volume_name_key() -> Vec<u8> {
    vec![TAG_ATTRIBUTE, 0x01]
}

/// The 56-byte value of a directory or file entry record.
pub fn entry_value(
    object_identifier: u64,
    attributes: u32,
    times: [u64; 4],
    size: u64,
) -> Vec<u8> {
    let mut value = Vec::with_capacity(56);
    value.extend_from_slice(&object_identifier.to_le_bytes());
    for time in times {
        value.extend_from_slice(&time.to_le_bytes());
    }
    value.extend_from_slice(&attributes.to_le_bytes());
    value.extend_from_slice(&0u32.to_le_bytes());
    value.extend_from_slice(&size.to_le_bytes());
    value
}

/// Serializes a Ministore node from `(key, value, flags)` records.
pub fn build_node(records: &[(Vec<u8>, Vec<u8>, u16)]) -> Vec<u8> {
    const NODE_HEADER_SIZE: usize = 32;
    const RECORD_HEADER_SIZE: usize = 16;

    let table_end = NODE_HEADER_SIZE + 4 * records.len();
    let mut data = vec![0u8; table_end];
    for (index, (key, value, flags)) in records.iter().enumerate() {
        let offset = data.len();
        data[NODE_HEADER_SIZE + 4 * index..NODE_HEADER_SIZE + 4 * index + 4]
            .copy_from_slice(&(offset as u32).to_le_bytes());

        let record_size = RECORD_HEADER_SIZE + key.len() + value.len();
        data.extend_from_slice(&(record_size as u32).to_le_bytes());
        data.extend_from_slice(&(RECORD_HEADER_SIZE as u16).to_le_bytes());
        data.extend_from_slice(&(key.len() as u16).to_le_bytes());
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&((RECORD_HEADER_SIZE + key.len()) as u16).to_le_bytes());
        data.extend_from_slice(&(value.len() as u16).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(key);
        data.extend_from_slice(value);
    }

    let node_size = data.len() as u32;
    data[..4].copy_from_slice(&node_size.to_le_bytes());
    data[4..8].copy_from_slice(&(records.len() as u32).to_le_bytes());
    data[8..12].copy_from_slice(&node_size.to_le_bytes());
    data
}

pub struct ImageBuilder {
    data: Vec<u8>,
}

impl ImageBuilder {
    /// An image of `total_blocks` metadata blocks with a valid volume
    /// header: 512-byte sectors, 8 sectors per block (4 KiB clusters),
    /// version 1.2.
    pub fn new(total_blocks: u64) -> Self {
        let mut data = vec![0u8; total_blocks as usize * METADATA_BLOCK_SIZE];
        data[3..7].copy_from_slice(b"ReFS");
        data[16..20].copy_from_slice(b"FSRS");
        put_u16(&mut data, 22, 0x3407);
        // 32 sectors per 16 KiB metadata block, header sector excluded.
        put_u64(&mut data, 24, total_blocks * 32);
        put_u32(&mut data, 32, 512);
        put_u32(&mut data, 36, 8);
        data[40] = 1;
        data[41] = 2;
        put_u64(&mut data, 56, 0x5e20646520644520);
        Self { data }
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Writes a metadata block header at `block_number`.
    pub fn block_header(&mut self, block_number: u64, sequence_number: u64, node_type_flags: u8) {
        let offset = block_number as usize * METADATA_BLOCK_SIZE;
        put_u64(&mut self.data, offset, block_number);
        put_u64(&mut self.data, offset + 8, sequence_number);
        put_u64(&mut self.data, offset + 16, 0);
        self.data[offset + 24] = node_type_flags;
    }

    /// The level 0 metadata block at its fixed location, naming the two
    /// level 1 copies.
    pub fn level0(&mut self, primary: u64, secondary: u64) {
        self.block_header(0x1e, 1, 0);
        let payload = 0x1e * METADATA_BLOCK_SIZE + BLOCK_HEADER_SIZE;
        put_u64(&mut self.data, payload, primary);
        put_u64(&mut self.data, payload + 8, secondary);
    }

    /// A level 1 metadata block: self entry plus one 24-byte descriptor
    /// per level 2 block.
    pub fn level1(&mut self, block_number: u64, sequence_number: u64, level2_blocks: &[u64]) {
        self.plain_table(block_number, sequence_number, level2_blocks, 0);
    }

    /// A branch directory block: self entry plus one 24-byte descriptor
    /// per level 4 extent block.
    pub fn branch_directory(&mut self, block_number: u64, extents: &[u64]) {
        self.plain_table(block_number, 1, extents, NODE_TYPE_BRANCH);
    }

    fn plain_table(
        &mut self,
        block_number: u64,
        sequence_number: u64,
        children: &[u64],
        node_type_flags: u8,
    ) {
        self.block_header(block_number, sequence_number, node_type_flags);
        let base = block_number as usize * METADATA_BLOCK_SIZE;
        let data = &mut self.data[base..base + METADATA_BLOCK_SIZE];

        let mut record_offset = (TABLE_OFFSET_ARRAY + 4 * children.len()).next_multiple_of(8);
        put_u32(data, TABLE_ENTRY_OFFSET, record_offset as u32);
        put_u32(data, TABLE_ENTRY_SIZE, 24);
        put_u64(data, TABLE_SEQUENCE_NUMBER, sequence_number);
        put_u32(data, TABLE_NUMBER_OF_ENTRIES, children.len() as u32);

        put_u64(data, record_offset, block_number);
        put_u64(data, record_offset + 8, 0xaaaa);
        put_u64(data, record_offset + 16, 0xcccc);
        record_offset += 24;

        for (index, &child) in children.iter().enumerate() {
            put_u32(data, TABLE_OFFSET_ARRAY + 4 * index, record_offset as u32);
            put_u64(data, record_offset, child);
            put_u64(data, record_offset + 8, 0xaaaa);
            put_u64(data, record_offset + 16, 0xcccc);
            record_offset += 24;
        }
    }

    /// A level 2 metadata block: one 48-byte descriptor per `(block,
    /// object identifier, role identifier)` child.
    pub fn level2(&mut self, block_number: u64, children: &[(u64, u64, u64)]) {
        self.block_header(block_number, 1, 0);
        let base = block_number as usize * METADATA_BLOCK_SIZE;
        let data = &mut self.data[base..base + METADATA_BLOCK_SIZE];

        let mut record_offset = (TABLE_OFFSET_ARRAY + 4 * children.len()).next_multiple_of(8);
        put_u32(data, TABLE_ENTRY_OFFSET, record_offset as u32);
        put_u32(data, TABLE_ENTRY_SIZE, 48);
        put_u64(data, TABLE_SEQUENCE_NUMBER, 1);
        put_u32(data, TABLE_NUMBER_OF_ENTRIES, children.len() as u32);

        for (index, &(child, object_identifier, role_identifier)) in children.iter().enumerate() {
            put_u32(data, TABLE_OFFSET_ARRAY + 4 * index, record_offset as u32);
            put_u64(data, record_offset, child);
            put_u64(data, record_offset + 8, 0xaaaa);
            put_u64(data, record_offset + 16, 0xcccc);
            put_u16(data, record_offset + 24, 16);
            put_u64(data, record_offset + 32, object_identifier);
            put_u64(data, record_offset + 40, role_identifier);
            record_offset += 48;
        }
    }

    /// A directory block holding one Ministore node.
    pub fn directory(
        &mut self,
        block_number: u64,
        node_type_flags: u8,
        records: &[(Vec<u8>, Vec<u8>, u16)],
    ) {
        self.block_header(block_number, 1, node_type_flags);
        let node = build_node(records);
        assert!(node.len() <= METADATA_BLOCK_SIZE - BLOCK_HEADER_SIZE);
        let payload = block_number as usize * METADATA_BLOCK_SIZE + BLOCK_HEADER_SIZE;
        self.data[payload..payload + node.len()].copy_from_slice(&node);
    }

    pub fn build(self) -> MemoryStorage {
        MemoryStorage::new(self.data)
    }

    /// The image embedded at `offset` within a larger storage, for
    /// volume-offset opens.
    pub fn build_at_offset(self, offset: usize) -> MemoryStorage {
        let mut data = vec![0xeeu8; offset];
        data.extend_from_slice(&self.data);
        MemoryStorage::new(data)
    }
}

/// The canonical test volume: level 0 at 0x1e, level 1 copies at
/// 0x20/0x21 (primary ahead), one level 2 block at 0x22, the root
/// directory at 0x23.
pub fn standard_image(root_records: &[(Vec<u8>, Vec<u8>, u16)]) -> ImageBuilder {
    let mut image = ImageBuilder::new(0x30);
    image.level0(0x20, 0x21);
    image.level1(0x20, 2, &[0x22]);
    image.level1(0x21, 1, &[0x22]);
    image.level2(0x22, &[(0x23, 0, ROOT_DIRECTORY_IDENTIFIER)]);
    image.directory(0x23, NODE_TYPE_ROOT, root_records);
    image
}
