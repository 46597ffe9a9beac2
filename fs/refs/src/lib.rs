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

//! Read-only parser for the Microsoft Resilient File System (ReFS).
//!
//! [`Volume::open`] validates the volume header, reconciles the two level 1
//! metadata copies by sequence number, walks the level 2 tables down to the
//! level 3 directory blocks, and caches the root directory. From there
//! [`FileEntry`] exposes names, attributes, timestamps, sizes and lazy
//! sub-entry enumeration in key order.
//!
//! ```no_run
//! use sable_ds_file::FileStorage;
//! use sable_fs_refs::{Access, Volume};
//!
//! # fn main() -> sable_fs_refs::Result<()> {
//! let volume = Volume::open(FileStorage::open("/dev/sdb1")?, Access::READ, 0)?;
//! println!("{} v{:?}", volume.name_utf8()?, volume.version());
//!
//! let root = volume.root_directory();
//! for index in 0..root.number_of_sub_entries()? {
//!     let entry = root.sub_entry_by_index(index)?;
//!     if let Some(name) = entry.name() {
//!         println!("{} ({} bytes)", name.to_utf8()?, entry.size());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub use sable_fs::*;

mod block_tree;
mod descriptor;
mod directory;
mod entry;
mod metadata_block;
mod ministore;
mod support;
mod volume;
mod volume_header;

pub use crate::{
    entry::{EntryKind, FileEntry},
    support::{check_volume_signature, version},
    volume::{AbortHandle, Access, Volume},
    volume_header::{VolumeHeader, VOLUME_HEADER_SIZE},
};
