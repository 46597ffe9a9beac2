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

use log::error;

/// Read-only random access byte storage.
///
/// All reads are absolute; there is no cursor. A read that cannot fill the
/// whole buffer is an error, never a short read.
pub trait DataStorage {
    /// The size of the storage in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buffer` with the bytes at `offset`.
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;
}

impl<DS: DataStorage + ?Sized> DataStorage for &DS {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        (**self).read(offset, buffer)
    }
}

/// Byte storage backed by an in-memory buffer.
#[derive(Debug)]
pub struct MemoryStorage {
    data: Vec<u8>,
}

impl MemoryStorage {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for MemoryStorage {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl DataStorage for MemoryStorage {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(buffer.len() as u64)
            .ok_or(IoError::OutOfRange)?;
        if end > self.data.len() as u64 {
            error!(
                "Read of {} bytes at offset {offset} exceeds storage of {} bytes",
                buffer.len(),
                self.data.len()
            );
            return Err(Error::new(IoError::OutOfRange));
        }
        buffer.copy_from_slice(&self.data[offset as usize..end as usize]);
        Ok(())
    }
}

/// A window into another storage.
///
/// Offsets are re-based onto the window start and every read is
/// bounds-checked against the window, not the parent.
#[derive(Debug)]
pub struct SubStorage<DS> {
    inner: DS,
    offset: u64,
    length: u64,
}

impl<DS: DataStorage> SubStorage<DS> {
    pub fn new(inner: DS, offset: u64, length: u64) -> Result<Self> {
        let end = offset.checked_add(length).ok_or(ArgumentError::OutOfRange)?;
        if end > inner.len() {
            error!(
                "Sub range {offset}..{end} exceeds storage of {} bytes",
                inner.len()
            );
            return Err(Error::new(ArgumentError::OutOfRange));
        }
        Ok(Self {
            inner,
            offset,
            length,
        })
    }

    pub fn into_inner(self) -> DS {
        self.inner
    }
}

impl<DS: DataStorage> DataStorage for SubStorage<DS> {
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
        self.inner.read(self.offset + offset, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_reads_at_offset() {
        let storage = MemoryStorage::new((0..16).collect());
        let mut buffer = [0u8; 4];
        storage.read(4, &mut buffer).unwrap();
        assert_eq!(buffer, [4, 5, 6, 7]);
        assert_eq!(storage.len(), 16);
    }

    #[test]
    fn memory_storage_rejects_reads_past_the_end() {
        let storage = MemoryStorage::new(vec![0u8; 8]);
        let mut buffer = [0u8; 4];
        assert_eq!(
            storage.read(6, &mut buffer).unwrap_err().kind(),
            ErrorKind::Io(IoError::OutOfRange)
        );
        assert_eq!(
            storage.read(u64::MAX, &mut buffer).unwrap_err().kind(),
            ErrorKind::Io(IoError::OutOfRange)
        );
    }

    #[test]
    fn sub_storage_rebases_offsets() {
        let storage = MemoryStorage::new((0..16).collect());
        let sub = SubStorage::new(storage, 8, 4).unwrap();
        assert_eq!(sub.len(), 4);

        let mut buffer = [0u8; 2];
        sub.read(1, &mut buffer).unwrap();
        assert_eq!(buffer, [9, 10]);
    }

    #[test]
    fn sub_storage_bounds_against_the_window() {
        let storage = MemoryStorage::new((0..16).collect());
        let sub = SubStorage::new(&storage, 8, 4).unwrap();

        // In range of the parent, out of range of the window.
        let mut buffer = [0u8; 4];
        assert_eq!(
            sub.read(2, &mut buffer).unwrap_err().kind(),
            ErrorKind::Io(IoError::OutOfRange)
        );
    }

    #[test]
    fn sub_storage_rejects_windows_past_the_end() {
        let storage = MemoryStorage::new(vec![0u8; 8]);
        assert_eq!(
            SubStorage::new(&storage, 4, 8).unwrap_err().kind(),
            ErrorKind::Arguments(ArgumentError::OutOfRange)
        );
    }
}
