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

use std::{fs::File, io, os::unix::fs::FileExt, path::Path};

use log::error;
use sable_ds::{DataStorage, Error, IoError, Result};

/// Byte storage backed by a regular file or block device.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    length: u64,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|error| {
            error!("Unable to open {}: {error}", path.display());
            Error::new(IoError::Open)
        })?;
        let length = file
            .metadata()
            .map_err(|error| {
                error!("Unable to stat {}: {error}", path.display());
                Error::new(IoError::Open)
            })?
            .len();
        Ok(Self { file, length })
    }
}

impl DataStorage for FileStorage {
    fn len(&self) -> u64 {
        self.length
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(buffer.len() as u64)
            .ok_or(IoError::OutOfRange)?;
        if end > self.length {
            return Err(Error::new(IoError::OutOfRange));
        }
        self.file
            .read_exact_at(buffer, offset)
            .map_err(|error| match error.kind() {
                io::ErrorKind::UnexpectedEof => Error::new(IoError::UnexpectedEnd),
                _ => {
                    error!("Unable to read {} bytes at offset {offset}: {error}", buffer.len());
                    Error::new(IoError::Read)
                }
            })
    }
}
