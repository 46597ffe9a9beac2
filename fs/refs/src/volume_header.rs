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

/// Size of the on-disk volume header in bytes.
pub const VOLUME_HEADER_SIZE: usize = 512;

/// Metadata block size used by format version 1 volumes, independent of the
/// cluster block size.
const VERSION1_METADATA_BLOCK_SIZE: u32 = 16 * 1024;

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct VolumeHeaderLayout {
    /// The boot jump instruction. Not used by the file system driver.
    jump: [u8; 3],
    /// The file system signature.
    ///
    /// The valid value for this field is, in ASCII characters, "ReFS".
    file_system_signature: [u8; 4],
    /// Reserved.
    reserved1: [u8; 9],
    /// The file system record signature.
    ///
    /// The valid value for this field is, in ASCII characters, "FSRS".
    file_system_record_signature: [u8; 4],
    /// Reserved.
    reserved2: [u8; 2],
    /// The volume header checksum. The covered byte range is undocumented,
    /// the value is preserved but never verified.
    checksum: U16,
    /// The number of sectors of the volume, excluding the sector holding
    /// this header.
    number_of_sectors: U64,
    /// The number of bytes per sector.
    ///
    /// The valid values for this field are 256, 512, 1024, 2048 and 4096.
    bytes_per_sector: U32,
    /// The number of sectors per cluster block.
    ///
    /// The resulting cluster block size shall be either 4 KiB or 64 KiB.
    sectors_per_block: U32,
    /// The major format version.
    ///
    /// The valid values for this field are 1 (Windows Server 2012) and
    /// 3 (Windows Server 2016 and later).
    major_format_version: u8,
    /// The minor format version.
    minor_format_version: u8,
    /// Reserved.
    reserved3: [u8; 2],
    /// Reserved.
    reserved4: [u8; 4],
    /// Reserved.
    reserved5: [u8; 8],
    /// The volume serial number.
    volume_serial_number: U64,
    /// Reserved.
    reserved6: [u8; 8],
    /// Reserved.
    reserved7: [u8; 440],
}

/// The validated volume header.
///
/// Carries the geometry every later read depends on: the metadata block
/// size is 16 KiB on version 1 volumes and equal to the cluster block size
/// on version 3 volumes.
#[derive(Debug, Clone)]
pub struct VolumeHeader {
    bytes_per_sector: u32,
    cluster_block_size: u32,
    metadata_block_size: u32,
    volume_size: u64,
    major_format_version: u8,
    minor_format_version: u8,
    volume_serial_number: u64,
    checksum: u16,
}

impl VolumeHeader {
    /// Parses and validates the first [`VOLUME_HEADER_SIZE`] bytes of a
    /// volume.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (layout, _) = VolumeHeaderLayout::read_from_prefix(data).map_err(|_| {
            error!(
                "Volume header shall be {VOLUME_HEADER_SIZE} bytes, got {}",
                data.len()
            );
            Error::new(InputError::LengthExceedsContainer)
        })?;

        if layout.file_system_signature != *b"ReFS"
            || layout.file_system_record_signature != *b"FSRS"
        {
            error!("Volume header signatures shall be \"ReFS\" and \"FSRS\"");
            return Err(Error::new(InputError::Signature));
        }

        let bytes_per_sector = layout.bytes_per_sector.get();
        if !matches!(bytes_per_sector, 256 | 512 | 1024 | 2048 | 4096) {
            error!("Bytes per sector ({bytes_per_sector}) shall be 256, 512, 1024, 2048 or 4096");
            return Err(Error::new(InputError::UnsupportedValue));
        }

        let number_of_sectors = layout.number_of_sectors.get();
        let volume_size = number_of_sectors
            .checked_add(1)
            .and_then(|sectors| sectors.checked_mul(bytes_per_sector as u64))
            .ok_or_else(|| {
                error!("Number of sectors ({number_of_sectors}) overflows the volume size");
                Error::new(InputError::Overflow)
            })?;

        let sectors_per_block = layout.sectors_per_block.get();
        let cluster_block_size = sectors_per_block
            .checked_mul(bytes_per_sector)
            .ok_or_else(|| {
                error!("Sectors per block ({sectors_per_block}) overflows the cluster block size");
                Error::new(InputError::Overflow)
            })?;
        if cluster_block_size != 4096 && cluster_block_size != 65536 {
            error!("Cluster block size ({cluster_block_size}) shall be 4 KiB or 64 KiB");
            return Err(Error::new(InputError::UnsupportedValue));
        }

        let major_format_version = layout.major_format_version;
        let minor_format_version = layout.minor_format_version;
        if major_format_version != 1 && major_format_version != 3 {
            error!(
                "Format version ({major_format_version}.{minor_format_version}) shall be 1.x or 3.x"
            );
            return Err(Error::new(InputError::UnsupportedValue));
        }
        let metadata_block_size = if major_format_version == 1 {
            VERSION1_METADATA_BLOCK_SIZE
        } else {
            cluster_block_size
        };

        debug!(
            "Volume format {major_format_version}.{minor_format_version}, {bytes_per_sector} \
             bytes per sector, {cluster_block_size} bytes per cluster block, {volume_size} bytes"
        );

        Ok(Self {
            bytes_per_sector,
            cluster_block_size,
            metadata_block_size,
            volume_size,
            major_format_version,
            minor_format_version,
            volume_serial_number: layout.volume_serial_number.get(),
            checksum: layout.checksum.get(),
        })
    }

    /// Reads and validates the volume header at the start of the storage.
    pub fn read<DS: DataStorage>(data_storage: &DS) -> Result<Self> {
        if data_storage.len() < VOLUME_HEADER_SIZE as u64 {
            error!(
                "Volume of {} bytes is too small for a volume header",
                data_storage.len()
            );
            return Err(Error::new(InputError::LengthExceedsContainer).frame("read_volume_header"));
        }
        let mut data = [0u8; VOLUME_HEADER_SIZE];
        data_storage
            .read(0, &mut data)
            .map_err(|error| error.frame("read_volume_header"))?;
        Self::parse(&data).map_err(|error| error.frame("read_volume_header"))
    }

    pub fn bytes_per_sector(&self) -> u16 {
        self.bytes_per_sector as u16
    }

    pub fn cluster_block_size(&self) -> u32 {
        self.cluster_block_size
    }

    pub fn metadata_block_size(&self) -> u32 {
        self.metadata_block_size
    }

    pub fn volume_size(&self) -> u64 {
        self.volume_size
    }

    pub fn format_version(&self) -> (u8, u8) {
        (self.major_format_version, self.minor_format_version)
    }

    pub fn volume_serial_number(&self) -> u64 {
        self.volume_serial_number
    }

    /// The stored header checksum. Preserved as-is, a mismatch is never an
    /// error.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }
}
