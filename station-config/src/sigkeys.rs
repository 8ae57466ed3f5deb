//! Firmware signing keys: each a 64-byte uncompressed `(X, Y)` point on
//! SECP256R1, concatenated in a single keyfile. Used by the CUPS engine to
//! try every configured key against a firmware signature (spec.md §4.5
//! "Post-transfer").

use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct SigKeyStore {
    keys: Vec<[u8; 64]>,
}

impl SigKeyStore {
    pub fn empty() -> Self {
        Self { keys: Vec::new() }
    }

    /// Load a keyfile: a flat concatenation of 64-byte keys. A trailing
    /// partial key is ignored and logged.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        let blob = tokio::fs::read(path).await?;
        let mut keys = Vec::with_capacity(blob.len() / 64);
        for chunk in blob.chunks(64) {
            if chunk.len() == 64 {
                let mut key = [0u8; 64];
                key.copy_from_slice(chunk);
                keys.push(key);
            } else if !chunk.is_empty() {
                tracing::warn!(bytes = chunk.len(), "trailing partial signing key ignored");
            }
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[[u8; 64]] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// CRC-32/IEEE of key `idx`, `0` (and thus loop-terminating, per
    /// `sys_crcSigkey`'s `while (crc = ...) > 0` idiom) once `idx` is out of
    /// range.
    pub fn crc(&self, idx: usize) -> u32 {
        match self.keys.get(idx) {
            Some(key) => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(key);
                let crc = hasher.finalize();
                if crc == 0 {
                    1
                } else {
                    crc
                }
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn loads_concatenated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sig.keys");
        let blob = vec![0xABu8; 128];
        tokio::fs::write(&path, &blob).await.unwrap();
        let store = SigKeyStore::load(&path).await.unwrap();
        assert_eq!(store.keys().len(), 2);
    }

    #[test]
    fn crc_is_zero_past_last_key() {
        let store = SigKeyStore::empty();
        assert_eq!(store.crc(0), 0);
    }
}
