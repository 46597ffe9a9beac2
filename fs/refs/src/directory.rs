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

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error};
use sable_ds::DataStorage;
use sable_fs::{Error, ErrorKind, FileAttributes, FileTime, InputError, Name, Result};
use zerocopy::{
    little_endian::{U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

use crate::{
    block_tree::{BlockTree, Insertion},
    descriptor::DescriptorTable,
    entry::EntryKind,
    metadata_block::{MetadataBlock, NodeTypeFlags},
    ministore::{MinistoreNode, RecordRef},
    volume_header::VolumeHeader,
};

/// Role identifier of the root directory in level 2 metadata.
pub(crate) const ROOT_DIRECTORY_IDENTIFIER: u64 = 0x0000_0600;

/// Role identifier of a user directory in level 2 metadata.
pub(crate) const USER_DIRECTORY_IDENTIFIER: u64 = 0x0000_0701;

/// First key byte of an attribute record.
pub(crate) const RECORD_TAG_ATTRIBUTE: u8 = 0x10;

/// First key byte of a stream record.
pub(crate) const RECORD_TAG_STREAM: u8 = 0x20;

/// First key byte of a sub-directory entry record.
pub(crate) const RECORD_TAG_DIRECTORY: u8 = 0x30;

/// First key byte of a file entry record.
pub(crate) const RECORD_TAG_FILE: u8 = 0x40;

/// Attribute type byte of the volume name attribute.
pub(crate) const ATTRIBUTE_TYPE_VOLUME_NAME: u8 = 0x01;

/// The record classes a directory node is made of, keyed by the first key
/// byte. Unknown tags stay opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordKind {
    Attribute,
    Stream,
    Directory,
    File,
}

pub(crate) fn classify(key: &[u8]) -> Option<RecordKind> {
    match key.first() {
        Some(&RECORD_TAG_ATTRIBUTE) => Some(RecordKind::Attribute),
        Some(&RECORD_TAG_STREAM) => Some(RecordKind::Stream),
        Some(&RECORD_TAG_DIRECTORY) => Some(RecordKind::Directory),
        Some(&RECORD_TAG_FILE) => Some(RecordKind::File),
        _ => None,
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct EntryValueLayout {
    /// The object identifier of the referenced directory, 0 for files.
    object_identifier: U64,
    /// The creation time as a FILETIME value.
    creation_time: U64,
    /// The last modification time as a FILETIME value.
    modification_time: U64,
    /// The entry (metadata) modification time as a FILETIME value.
    entry_modification_time: U64,
    /// The last access time as a FILETIME value.
    access_time: U64,
    /// The file attribute flags.
    file_attribute_flags: U32,
    /// Unknown.
    unknown: U32,
    /// The logical data size in bytes.
    data_size: U64,
}

/// A decoded directory or file entry record.
#[derive(Debug, Clone)]
pub(crate) struct DirectoryEntryRecord {
    pub(crate) key: Vec<u8>,
    pub(crate) kind: EntryKind,
    pub(crate) name: Name,
    pub(crate) object_identifier: u64,
    pub(crate) attributes: FileAttributes,
    pub(crate) creation_time: FileTime,
    pub(crate) modification_time: FileTime,
    pub(crate) entry_modification_time: FileTime,
    pub(crate) access_time: FileTime,
    pub(crate) size: u64,
}

/// Decodes an entry record: the UTF-16 name sits behind the two key tag
/// bytes, the fixed-size metadata in the value.
pub(crate) fn parse_entry_record(record: RecordRef<'_>) -> Result<DirectoryEntryRecord> {
    let kind = match classify(record.key) {
        Some(RecordKind::Directory) => EntryKind::Directory,
        Some(RecordKind::File) => EntryKind::File,
        _ => {
            error!("Record is not a directory or file entry");
            return Err(Error::new(InputError::UnsupportedValue));
        }
    };
    let name_data = record.key.get(2..).ok_or_else(|| {
        error!("Entry key of {} bytes is too short", record.key.len());
        Error::new(InputError::LengthExceedsContainer)
    })?;
    let name = Name::from_utf16le(name_data)?;

    let (value, _) = EntryValueLayout::read_from_prefix(record.value).map_err(|_| {
        error!("Entry value of {} bytes is too short", record.value.len());
        Error::new(InputError::LengthExceedsContainer)
    })?;

    Ok(DirectoryEntryRecord {
        key: record.key.to_vec(),
        kind,
        name,
        object_identifier: value.object_identifier.get(),
        attributes: FileAttributes::from_bits_retain(value.file_attribute_flags.get()),
        creation_time: FileTime::from_ticks(value.creation_time.get()),
        modification_time: FileTime::from_ticks(value.modification_time.get()),
        entry_modification_time: FileTime::from_ticks(value.entry_modification_time.get()),
        access_time: FileTime::from_ticks(value.access_time.get()),
        size: value.data_size.get(),
    })
}

/// The resolved Ministore nodes of one directory.
///
/// Most directories are a single leaf node; large ones are a branch block
/// whose extents each hold one leaf node, enumerated in extent order.
#[derive(Debug, Clone)]
pub(crate) struct DirectoryTable {
    nodes: Vec<MinistoreNode>,
}

impl DirectoryTable {
    pub(crate) fn empty() -> Self {
        Self { nodes: Vec::new() }
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = RecordRef<'_>> {
        self.nodes.iter().flat_map(|node| node.records())
    }

    /// The number of file and sub-directory entries.
    pub(crate) fn number_of_entries(&self) -> usize {
        self.records()
            .filter(|record| {
                matches!(
                    classify(record.key),
                    Some(RecordKind::Directory | RecordKind::File)
                )
            })
            .count()
    }

    /// The `index`-th file or sub-directory entry record in key order.
    pub(crate) fn entry_record(&self, index: usize) -> Option<RecordRef<'_>> {
        self.records()
            .filter(|record| {
                matches!(
                    classify(record.key),
                    Some(RecordKind::Directory | RecordKind::File)
                )
            })
            .nth(index)
    }

    /// The volume name attribute, where present.
    pub(crate) fn volume_name(&self) -> Result<Option<Name>> {
        for record in self.records() {
            if record.key.first() == Some(&RECORD_TAG_ATTRIBUTE)
                && record.key.get(1) == Some(&ATTRIBUTE_TYPE_VOLUME_NAME)
            {
                return Name::from_utf16le(record.value).map(Some);
            }
        }
        Ok(None)
    }
}

/// Reads a directory's Ministore nodes at `block_number`.
///
/// A leaf block holds the node in its payload. A branch block holds an
/// extent list of level 4 blocks instead, each contributing one leaf node.
/// During the open descent the block tree tracks visited extents so that a
/// descriptor cycle degrades into a skip instead of a loop.
pub(crate) fn read_directory_table<DS: DataStorage>(
    data_storage: &DS,
    header: &VolumeHeader,
    abort: &AtomicBool,
    mut block_tree: Option<&mut BlockTree>,
    block_number: u64,
    level: u32,
) -> Result<DirectoryTable> {
    let block = MetadataBlock::read(data_storage, header, block_number, level)
        .map_err(|error| error.frame("read_directory"))?;
    debug!(
        "Directory block {}: sequence {}, object {:#x}, record flags {:#x}",
        block.block_number(),
        block.sequence_number(),
        block.object_identifier(),
        block.node_record_flags()
    );

    if !block.node_type_flags().contains(NodeTypeFlags::BRANCH) {
        let node = MinistoreNode::parse(block.payload())
            .map_err(|error| error.frame_at("read_directory", block_number, 0))?;
        log_node(&node);
        return Ok(DirectoryTable { nodes: vec![node] });
    }

    let extents = DescriptorTable::read_extent_list(&block)
        .map_err(|error| error.frame("read_directory"))?;
    debug!(
        "Directory block {block_number} is a branch of {} extents",
        extents.entries.len()
    );

    let metadata_block_size = header.metadata_block_size() as u64;
    let mut nodes = Vec::with_capacity(extents.entries.len());
    for descriptor in &extents.entries {
        if abort.load(Ordering::Relaxed) {
            return Err(Error::new(ErrorKind::Aborted));
        }
        if let Some(block_tree) = block_tree.as_deref_mut() {
            let offset = descriptor
                .block_number
                .checked_mul(metadata_block_size)
                .ok_or(InputError::Overflow)?;
            if let Insertion::Existing(existing) = block_tree.insert(offset, descriptor.clone())? {
                debug!(
                    "Extent block {} was already visited as block {}, skipping",
                    descriptor.block_number, existing.block_number
                );
                continue;
            }
        }

        let extent_block =
            MetadataBlock::read(data_storage, header, descriptor.block_number, level + 1)
                .map_err(|error| error.frame("read_directory"))?;
        if extent_block.node_type_flags().contains(NodeTypeFlags::BRANCH) {
            error!(
                "Extent block {} shall be a leaf node",
                descriptor.block_number
            );
            return Err(Error::new(InputError::UnsupportedValue).frame_at(
                "read_directory",
                descriptor.block_number,
                0,
            ));
        }
        let node = MinistoreNode::parse(extent_block.payload())
            .map_err(|error| error.frame_at("read_directory", descriptor.block_number, 0))?;
        log_node(&node);
        nodes.push(node);
    }

    Ok(DirectoryTable { nodes })
}

fn log_node(node: &MinistoreNode) {
    debug!(
        "Directory node: {} records, free space at {}",
        node.number_of_records(),
        node.free_space_offset()
    );
    for record in node.records() {
        if let Some(embedded_node) = record.embedded_node {
            debug!(
                "Record with flags {:?} carries an embedded node of {} records",
                record.flags,
                embedded_node.number_of_records()
            );
        }
    }
}
