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

use sable_ds::DataStorage;
use sable_fs::Result;

use crate::volume_header::VOLUME_HEADER_SIZE;

/// The library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Checks whether the storage starts with a ReFS volume header, without
/// validating anything beyond the two signatures.
///
/// Storage too small for a volume header is simply not a ReFS volume,
/// never an error.
pub fn check_volume_signature<DS: DataStorage>(data_storage: &DS) -> Result<bool> {
    if data_storage.len() < VOLUME_HEADER_SIZE as u64 {
        return Ok(false);
    }
    let mut data = [0u8; VOLUME_HEADER_SIZE];
    data_storage
        .read(0, &mut data)
        .map_err(|error| error.frame("check_volume_signature"))?;
    Ok(data[3..7] == *b"ReFS" && data[16..20] == *b"FSRS")
}

#[cfg(test)]
mod tests {
    use sable_ds::MemoryStorage;

    use super::*;
    use crate::volume_header::tests::header_fixture;

    #[test]
    fn recognizes_a_volume_header() {
        let storage = MemoryStorage::new(header_fixture().to_vec());
        assert!(check_volume_signature(&storage).unwrap());
    }

    #[test]
    fn rejects_other_signatures() {
        let mut data = header_fixture();
        data[3..7].copy_from_slice(b"NTFS");
        assert!(!check_volume_signature(&MemoryStorage::new(data.to_vec())).unwrap());

        assert!(!check_volume_signature(&MemoryStorage::new(vec![0u8; 64])).unwrap());
        assert!(!check_volume_signature(&MemoryStorage::new(Vec::new())).unwrap());
    }
}
