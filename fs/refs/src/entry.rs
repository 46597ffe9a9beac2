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

use std::borrow::Cow;

use log::error;
use sable_ds::DataStorage;
use sable_fs::{
    ArgumentError, Error, ErrorKind, FileAttributes, FileTime, InputError, Name, Result,
    RuntimeError,
};

use crate::{
    directory::{self, DirectoryEntryRecord, DirectoryTable},
    volume::Volume,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Where a directory entry finds its Ministore nodes.
#[derive(Debug)]
enum NodeSource {
    /// The root directory, cached by the volume at open.
    Root,
    /// A user directory, re-resolved through the object table on demand.
    ObjectIdentifier(u64),
    /// Files have no sub-entries.
    None,
}

/// A file or directory of an open volume.
///
/// Entries are short-lived projections: they carry everything needed to
/// re-resolve their directory node and borrow nothing from each other. A
/// sub-entry does not keep its parent alive, only the volume, whose borrow
/// also keeps the volume open for as long as any entry exists.
#[derive(Debug)]
pub struct FileEntry<'vol, DS: DataStorage> {
    volume: &'vol Volume<DS>,
    key: Vec<u8>,
    name: Option<Name>,
    kind: EntryKind,
    attributes: FileAttributes,
    creation_time: FileTime,
    modification_time: FileTime,
    entry_modification_time: FileTime,
    access_time: FileTime,
    size: u64,
    node_source: NodeSource,
}

impl<'vol, DS: DataStorage> FileEntry<'vol, DS> {
    pub(crate) fn root(volume: &'vol Volume<DS>) -> Self {
        Self {
            volume,
            key: Vec::new(),
            name: None,
            kind: EntryKind::Directory,
            attributes: FileAttributes::DIRECTORY,
            creation_time: FileTime::default(),
            modification_time: FileTime::default(),
            entry_modification_time: FileTime::default(),
            access_time: FileTime::default(),
            size: 0,
            node_source: NodeSource::Root,
        }
    }

    fn from_record(volume: &'vol Volume<DS>, record: DirectoryEntryRecord) -> Self {
        let node_source = match record.kind {
            EntryKind::Directory => NodeSource::ObjectIdentifier(record.object_identifier),
            EntryKind::File => NodeSource::None,
        };
        Self {
            volume,
            key: record.key,
            name: Some(record.name),
            kind: record.kind,
            attributes: record.attributes,
            creation_time: record.creation_time,
            modification_time: record.modification_time,
            entry_modification_time: record.entry_modification_time,
            access_time: record.access_time,
            size: record.size,
            node_source,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// The key identifying the entry within its parent directory. Empty for
    /// the root.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The on-disk name. The root directory has none.
    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    pub fn flags(&self) -> FileAttributes {
        self.attributes
    }

    /// The logical data size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn creation_time(&self) -> FileTime {
        self.creation_time
    }

    pub fn modification_time(&self) -> FileTime {
        self.modification_time
    }

    pub fn entry_modification_time(&self) -> FileTime {
        self.entry_modification_time
    }

    pub fn access_time(&self) -> FileTime {
        self.access_time
    }

    /// The number of bytes of the UTF-8 form of the name.
    pub fn name_utf8_size(&self) -> Result<usize> {
        self.required_name()?.utf8_size()
    }

    pub fn copy_name_utf8(&self, buffer: &mut [u8]) -> Result<usize> {
        self.required_name()?.copy_utf8(buffer)
    }

    pub fn copy_name_utf16(&self, buffer: &mut [u16]) -> Result<usize> {
        self.required_name()?.copy_utf16(buffer)
    }

    fn required_name(&self) -> Result<&Name> {
        self.name.as_ref().ok_or_else(|| Error::new(RuntimeError::ValueMissing))
    }

    /// The number of file and sub-directory entries. Zero for files and for
    /// an empty volume's root.
    pub fn number_of_sub_entries(&self) -> Result<usize> {
        self.check_abort()?;
        Ok(match self.directory_table()? {
            Some(table) => table.number_of_entries(),
            None => 0,
        })
    }

    /// Materializes a fresh entry for the `index`-th sub-entry in key
    /// order.
    pub fn sub_entry_by_index(&self, index: usize) -> Result<FileEntry<'vol, DS>> {
        self.check_abort()?;
        let Some(table) = self.directory_table()? else {
            error!("Files have no sub-entries");
            return Err(Error::new(ArgumentError::InvalidValue));
        };
        let record = table.entry_record(index).ok_or_else(|| {
            error!(
                "Sub-entry index {index} is out of range of {} entries",
                table.number_of_entries()
            );
            Error::new(ArgumentError::OutOfRange)
        })?;
        let record = directory::parse_entry_record(record)?;
        Ok(Self::from_record(self.volume, record))
    }

    fn check_abort(&self) -> Result<()> {
        if self.volume.abort_signaled() {
            return Err(Error::new(ErrorKind::Aborted));
        }
        Ok(())
    }

    /// Resolves the directory's Ministore nodes: the cached table for the
    /// root, a fresh read through the object table for sub-directories, and
    /// nothing for files.
    fn directory_table(&self) -> Result<Option<Cow<'_, DirectoryTable>>> {
        match self.node_source {
            NodeSource::None => Ok(None),
            NodeSource::Root => Ok(Some(match self.volume.root_table() {
                Some(table) => Cow::Borrowed(table),
                None => Cow::Owned(DirectoryTable::empty()),
            })),
            NodeSource::ObjectIdentifier(object_identifier) => {
                let block_number = self
                    .volume
                    .directory_block_number(object_identifier)
                    .ok_or_else(|| {
                        error!(
                            "Directory object {object_identifier:#x} is not in the object table"
                        );
                        Error::new(InputError::OutOfBounds).frame("sub_entries")
                    })?;
                let table = directory::read_directory_table(
                    self.volume.storage(),
                    self.volume.header(),
                    self.volume.abort_flag(),
                    None,
                    block_number,
                    4,
                )?;
                Ok(Some(Cow::Owned(table)))
            }
        }
    }
}
