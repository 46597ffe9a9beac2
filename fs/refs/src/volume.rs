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

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, error, warn};
use sable_ds::{DataStorage, SubStorage};
use sable_fs::{ArgumentError, Error, ErrorKind, InputError, Name, Result, RuntimeError};

use crate::{
    block_tree::{BlockTree, Insertion},
    descriptor::{BlockDescriptor, DescriptorTable, Level0Metadata, LEVEL0_BLOCK_NUMBER},
    directory::{
        read_directory_table, DirectoryTable, ROOT_DIRECTORY_IDENTIFIER, USER_DIRECTORY_IDENTIFIER,
    },
    entry::FileEntry,
    metadata_block::MetadataBlock,
    volume_header::VolumeHeader,
};

bitflags::bitflags! {
    /// Volume access flags. The parser is read-only, requesting write
    /// access fails the open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
    }
}

/// A cloneable handle for aborting an open volume's operations from
/// another thread.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Requests the abort. In-flight operations return `aborted` at the
    /// next loop head that observes the flag.
    pub fn signal(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct MetadataScan {
    root_table: Option<DirectoryTable>,
    directory_block_numbers: BTreeMap<u64, u64>,
    name: Option<Name>,
}

/// An open ReFS volume.
///
/// The volume owns the byte source and everything resolved during the
/// open: the validated header, the cached root directory node, the object
/// table mapping directory object identifiers to their blocks, and the
/// block tree of visited metadata ranges. [`FileEntry`] handles borrow the
/// volume, so closing while entries exist is rejected at compile time.
#[derive(Debug)]
pub struct Volume<DS: DataStorage> {
    data_storage: SubStorage<DS>,
    header: VolumeHeader,
    name: Option<Name>,
    root_table: Option<DirectoryTable>,
    directory_block_numbers: BTreeMap<u64, u64>,
    block_tree: BlockTree,
    abort: Arc<AtomicBool>,
}

impl<DS: DataStorage> Volume<DS> {
    /// Opens the ReFS volume at `volume_offset` within the storage.
    ///
    /// Validates the volume header, walks the metadata hierarchy from the
    /// level 0 block down to the level 3 blocks, reconciles the two level 1
    /// copies by sequence number, and caches the root directory node. Any
    /// decode failure aborts the open and releases the partial state.
    pub fn open(data_storage: DS, access: Access, volume_offset: u64) -> Result<Self> {
        if !access.contains(Access::READ) {
            error!("Access flags shall include read");
            return Err(Error::new(ArgumentError::InvalidValue).frame("volume_open"));
        }
        if access.contains(Access::WRITE) {
            error!("Write access is not supported");
            return Err(Error::new(ArgumentError::UnsupportedAccessFlags).frame("volume_open"));
        }

        let length = data_storage.len();
        if volume_offset > length {
            error!("Volume offset {volume_offset} lies outside the storage of {length} bytes");
            return Err(Error::new(ArgumentError::OutOfRange).frame("volume_open"));
        }
        let data_storage = SubStorage::new(data_storage, volume_offset, length - volume_offset)
            .map_err(|error| error.frame("volume_open"))?;

        let header = VolumeHeader::read(&data_storage).map_err(|error| error.frame("volume_open"))?;
        let mut block_tree =
            BlockTree::new(header.volume_size(), header.metadata_block_size() as u64)
                .map_err(|error| error.frame("volume_open"))?;

        let abort = Arc::new(AtomicBool::new(false));
        let metadata_block_size = header.metadata_block_size() as u64;
        let level0_end = (LEVEL0_BLOCK_NUMBER + 1) * metadata_block_size;
        let scan = if level0_end <= data_storage.len() && level0_end <= header.volume_size() {
            Self::open_read(&data_storage, &header, &abort, &mut block_tree)
                .map_err(|error| error.frame("volume_open"))?
        } else {
            debug!("Volume ends before the level 0 metadata block, treating it as empty");
            MetadataScan::default()
        };

        Ok(Self {
            data_storage,
            header,
            name: scan.name,
            root_table: scan.root_table,
            directory_block_numbers: scan.directory_block_numbers,
            block_tree,
            abort,
        })
    }

    /// Walks level 0 → level 1 (both copies) → level 2 → level 3, caching
    /// the root directory and recording every user directory in the object
    /// table.
    fn open_read(
        data_storage: &SubStorage<DS>,
        header: &VolumeHeader,
        abort: &AtomicBool,
        block_tree: &mut BlockTree,
    ) -> Result<MetadataScan> {
        let metadata_block_size = header.metadata_block_size() as u64;
        let level0 = Level0Metadata::read(data_storage, header)?;

        debug!("Reading level 1 primary metadata");
        let primary_block = MetadataBlock::read(
            data_storage,
            header,
            level0.primary_level1_block_number,
            1,
        )?;
        let primary = DescriptorTable::read_level1(&primary_block)?;

        debug!("Reading level 1 secondary metadata");
        let secondary_block = MetadataBlock::read(
            data_storage,
            header,
            level0.secondary_level1_block_number,
            1,
        )?;
        let secondary = DescriptorTable::read_level1(&secondary_block)?;

        // The copy with the greater sequence number is authoritative, a tie
        // goes to the primary.
        let (level1, level1_block_number) = if primary.sequence_number >= secondary.sequence_number
        {
            debug!(
                "Following the primary level 1 metadata, sequence {} >= {}",
                primary.sequence_number, secondary.sequence_number
            );
            (primary, level0.primary_level1_block_number)
        } else {
            debug!(
                "Following the secondary level 1 metadata, sequence {} > {}",
                secondary.sequence_number, primary.sequence_number
            );
            (secondary, level0.secondary_level1_block_number)
        };
        block_tree.insert(
            level1_block_number
                .checked_mul(metadata_block_size)
                .ok_or(InputError::Overflow)?,
            BlockDescriptor::new(level1_block_number, 0, 0),
        )?;

        let mut scan = MetadataScan::default();
        for level2_descriptor in &level1.entries {
            if abort.load(Ordering::Relaxed) {
                return Err(Error::new(ErrorKind::Aborted));
            }
            let offset = level2_descriptor
                .block_number
                .checked_mul(metadata_block_size)
                .ok_or(InputError::Overflow)?;
            if let Insertion::Existing(_) = block_tree.insert(offset, level2_descriptor.clone())? {
                debug!(
                    "Level 2 block {} was already visited, skipping",
                    level2_descriptor.block_number
                );
                continue;
            }

            let level2_block =
                MetadataBlock::read(data_storage, header, level2_descriptor.block_number, 2)?;
            let level2 = DescriptorTable::read_level2(&level2_block)?;

            for level3_descriptor in &level2.entries {
                if abort.load(Ordering::Relaxed) {
                    return Err(Error::new(ErrorKind::Aborted));
                }
                let offset = level3_descriptor
                    .block_number
                    .checked_mul(metadata_block_size)
                    .ok_or(InputError::Overflow)?;
                if let Insertion::Existing(_) =
                    block_tree.insert(offset, level3_descriptor.clone())?
                {
                    debug!(
                        "Level 3 block {} was already visited, skipping",
                        level3_descriptor.block_number
                    );
                    continue;
                }

                match level3_descriptor.role_identifier() {
                    Some(ROOT_DIRECTORY_IDENTIFIER) => {
                        debug!(
                            "Reading the root directory at block {}",
                            level3_descriptor.block_number
                        );
                        let table = read_directory_table(
                            data_storage,
                            header,
                            abort,
                            Some(&mut *block_tree),
                            level3_descriptor.block_number,
                            4,
                        )?;
                        if scan.root_table.is_some() {
                            warn!("Multiple root directories, keeping the first");
                        } else {
                            scan.name = table.volume_name()?;
                            scan.root_table = Some(table);
                        }
                    }
                    Some(USER_DIRECTORY_IDENTIFIER) => {
                        debug!(
                            "Reading directory object {:#x} at block {}",
                            level3_descriptor.object_identifier().unwrap_or_default(),
                            level3_descriptor.block_number
                        );
                        read_directory_table(
                            data_storage,
                            header,
                            abort,
                            Some(&mut *block_tree),
                            level3_descriptor.block_number,
                            4,
                        )?;
                        if let Some(object_identifier) = level3_descriptor.object_identifier() {
                            scan.directory_block_numbers
                                .insert(object_identifier, level3_descriptor.block_number);
                        }
                    }
                    _ => {
                        // Opaque role: consume the block, discard the payload.
                        debug!(
                            "Level 3 block {} with identifier data {:02x?}",
                            level3_descriptor.block_number,
                            level3_descriptor.identifier_data()
                        );
                        MetadataBlock::read(
                            data_storage,
                            header,
                            level3_descriptor.block_number,
                            3,
                        )?;
                    }
                }
            }
        }
        Ok(scan)
    }

    /// Closes the volume, releasing the byte source.
    ///
    /// Outstanding [`FileEntry`] handles borrow the volume, so a close with
    /// entries still alive does not compile.
    pub fn close(self) -> Result<()> {
        debug!("Closing volume");
        drop(self);
        Ok(())
    }

    /// Requests the abort of in-flight and future operations on this
    /// volume. They return `aborted` at the next loop head.
    pub fn signal_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    /// A handle for signalling the abort from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: self.abort.clone(),
        }
    }

    /// The volume name, where the volume carries one.
    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    pub fn name_utf8(&self) -> Result<String> {
        self.required_name()?.to_utf8()
    }

    pub fn name_utf8_size(&self) -> Result<usize> {
        self.required_name()?.utf8_size()
    }

    pub fn name_utf16(&self) -> Result<&[u16]> {
        Ok(self.required_name()?.units())
    }

    pub fn name_utf16_size(&self) -> Result<usize> {
        Ok(self.required_name()?.units().len())
    }

    fn required_name(&self) -> Result<&Name> {
        self.name.as_ref().ok_or_else(|| Error::new(RuntimeError::ValueMissing))
    }

    /// The major and minor format version.
    pub fn version(&self) -> (u8, u8) {
        self.header.format_version()
    }

    pub fn serial_number(&self) -> u64 {
        self.header.volume_serial_number()
    }

    pub fn bytes_per_sector(&self) -> u16 {
        self.header.bytes_per_sector()
    }

    pub fn cluster_block_size(&self) -> u32 {
        self.header.cluster_block_size()
    }

    pub fn metadata_block_size(&self) -> u32 {
        self.header.metadata_block_size()
    }

    pub fn volume_size(&self) -> u64 {
        self.header.volume_size()
    }

    /// The root directory. An entry of a volume too small to carry
    /// metadata has no sub-entries.
    pub fn root_directory(&self) -> FileEntry<'_, DS> {
        FileEntry::root(self)
    }

    /// The metadata block recorded for `offset` during the open descent,
    /// as `(block_number, interval_start)`.
    pub fn block_descriptor_at(&self, offset: u64) -> Option<(u64, u64)> {
        self.block_tree
            .lookup(offset)
            .map(|(descriptor, interval_start)| (descriptor.block_number, interval_start))
    }

    pub(crate) fn root_table(&self) -> Option<&DirectoryTable> {
        self.root_table.as_ref()
    }

    pub(crate) fn directory_block_number(&self, object_identifier: u64) -> Option<u64> {
        self.directory_block_numbers.get(&object_identifier).copied()
    }

    pub(crate) fn storage(&self) -> &SubStorage<DS> {
        &self.data_storage
    }

    pub(crate) fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub(crate) fn abort_flag(&self) -> &AtomicBool {
        &self.abort
    }

    pub(crate) fn abort_signaled(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}
