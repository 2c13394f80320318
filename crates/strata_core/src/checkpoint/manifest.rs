//! Storage manifest: where the last checkpoint is.

use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use strata_codec::{from_cbor, to_cbor};
use strata_storage::BackendProvider;
use uuid::Uuid;

/// Key of the manifest under the storage root.
pub const MANIFEST_KEY: &str = "MANIFEST";

/// Magic bytes for manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"SMFN";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4).
const HEADER_SIZE: usize = 10;

/// Storage-wide metadata, rewritten atomically after every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Identity of this storage, fixed at creation.
    pub storage_id: Uuid,
    /// Timestamp captured by the last checkpoint.
    pub last_checkpoint_ts: Option<Timestamp>,
    /// Checkpoint file of the last checkpoint, relative to the root.
    pub checkpoint_file: Option<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Creates a manifest for a new storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format_version: (1, 0),
            storage_id: Uuid::new_v4(),
            last_checkpoint_ts: None,
            checkpoint_file: None,
        }
    }

    /// Encodes the manifest to bytes.
    ///
    /// ```text
    /// | magic (4) | version (2) | length (4) | cbor (N) | crc32 (4) |
    /// ```
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let body = to_cbor(self)?;
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::invalid_operation("manifest too large"))?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len() + 4);
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&body);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a manifest from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE + 4 || data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::checkpoint_corruption("invalid manifest magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > MANIFEST_VERSION {
            return Err(CoreError::checkpoint_corruption(format!(
                "unsupported manifest version: {version}"
            )));
        }
        let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        let body_end = HEADER_SIZE + len;
        if data.len() != body_end + 4 {
            return Err(CoreError::checkpoint_corruption("manifest length mismatch"));
        }
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let computed = crc32fast::hash(&data[..body_end]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }
        from_cbor(&data[HEADER_SIZE..body_end])
            .map_err(|e| CoreError::checkpoint_corruption(format!("bad manifest: {e}")))
    }

    /// Loads the manifest. Returns `None` for a new storage.
    pub fn load(provider: &dyn BackendProvider) -> CoreResult<Option<Self>> {
        if !provider.exists(MANIFEST_KEY) {
            return Ok(None);
        }
        let data = provider.read(MANIFEST_KEY)?;
        if data.is_empty() {
            return Ok(None);
        }
        Self::decode(&data).map(Some)
    }

    /// Replaces the manifest atomically.
    pub fn save(&self, provider: &dyn BackendProvider) -> CoreResult<()> {
        provider.write_atomic(MANIFEST_KEY, &self.encode()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::MemoryProvider;

    #[test]
    fn new_manifest_has_no_checkpoint() {
        let manifest = Manifest::new();
        assert_eq!(manifest.format_version, (1, 0));
        assert!(manifest.last_checkpoint_ts.is_none());
        assert_ne!(manifest.storage_id, Manifest::new().storage_id);
    }

    #[test]
    fn save_and_load() {
        let provider = MemoryProvider::new();
        assert!(Manifest::load(&provider).unwrap().is_none());

        let mut manifest = Manifest::new();
        manifest.last_checkpoint_ts = Some(Timestamp(42));
        manifest.checkpoint_file = Some("data/checkpoint/ckp-42.cbor".into());
        manifest.save(&provider).unwrap();

        assert_eq!(Manifest::load(&provider).unwrap(), Some(manifest));
    }

    #[test]
    fn invalid_magic_rejected() {
        assert!(matches!(
            Manifest::decode(b"XXXXXXXXXXXXXXXX"),
            Err(CoreError::CheckpointCorruption { .. })
        ));
    }

    #[test]
    fn flipped_bit_rejected() {
        let mut data = Manifest::new().encode().unwrap();
        data[HEADER_SIZE + 2] ^= 0x01;
        assert!(matches!(
            Manifest::decode(&data),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }
}
