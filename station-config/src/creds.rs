//! Credential store: two categories (CUPS, TC) times three sets (REG, BAK,
//! BOOT), each holding a URI, optional TLS material, and an optional
//! authentication-token blob (spec.md §3 "Credential store"). Staged writes
//! land in `<home>/<cat>.<set>.stage` and are only promoted to the live file
//! on `commit_config_update`, matching `sys_commitConfigUpdate`'s all-or-
//! nothing semantics.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Cups,
    Tc,
}

impl Category {
    fn tag(self) -> &'static str {
        match self {
            Self::Cups => "cups",
            Self::Tc => "tc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredSet {
    Reg,
    Bak,
    Boot,
}

impl CredSet {
    fn tag(self) -> &'static str {
        match self {
            Self::Reg => "reg",
            Self::Bak => "bak",
            Self::Boot => "boot",
        }
    }

    /// `(credset + 1) mod 3`, the rotation order REG -> BAK -> BOOT -> REG.
    pub fn rotate(self) -> Self {
        match self {
            Self::Reg => Self::Bak,
            Self::Bak => Self::Boot,
            Self::Boot => Self::Reg,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredError {
    #[error("no credential update in progress for this category")]
    NotStarted,
    #[error("write offset {off} + len {len} exceeds declared segment length {declared}")]
    OutOfRange { off: usize, len: usize, declared: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub uri: Option<String>,
    pub trust_anchors: Option<Vec<u8>>,
    pub client_cert: Option<Vec<u8>>,
    pub client_key: Option<Vec<u8>>,
    pub auth_token: Option<Vec<u8>>,
}

struct InProgress {
    category: Category,
    declared_len: usize,
    path: PathBuf,
}

/// Owns the on-disk staging area plus the nine (category x set) slots held
/// in memory. Only the CUPS engine ever calls the mutating methods; other
/// components read `slot` at session boundaries (spec.md §5 "Shared
/// resources").
pub struct CredentialStore {
    home_dir: PathBuf,
    slots: [[Slot; 3]; 2],
    in_progress: Option<InProgress>,
}

fn idx(cat: Category) -> usize {
    match cat {
        Category::Cups => 0,
        Category::Tc => 1,
    }
}

fn set_idx(set: CredSet) -> usize {
    match set {
        CredSet::Reg => 0,
        CredSet::Bak => 1,
        CredSet::Boot => 2,
    }
}

impl CredentialStore {
    pub fn new(home_dir: PathBuf) -> Self {
        Self {
            home_dir,
            slots: [
                [Slot::default(), Slot::default(), Slot::default()],
                [Slot::default(), Slot::default(), Slot::default()],
            ],
            in_progress: None,
        }
    }

    /// Rebuild a store from whatever this home directory already has on
    /// disk: a previous process's committed credential blobs and saved URIs
    /// (spec.md §6 "Persisted state": "credential slots under the home
    /// directory, grouped by (cat, set)"). Missing files simply leave that
    /// slot empty; this is the normal case for BAK/BOOT until a rotation
    /// actually promotes into them.
    pub fn load(home_dir: PathBuf) -> Self {
        let mut store = Self::new(home_dir);
        for cat in [Category::Cups, Category::Tc] {
            for set in [CredSet::Reg, CredSet::Bak, CredSet::Boot] {
                if let Ok(uri) = std::fs::read_to_string(store.uri_path(cat, set)) {
                    store.slot_mut(cat, set).uri = Some(uri);
                }
                if let Ok(blob) = std::fs::read(store.live_path(cat, set)) {
                    let mut parts = blob.split(|&b| b == 0x00);
                    store.slot_mut(cat, set).trust_anchors = parts.next().filter(|p| !p.is_empty()).map(|p| p.to_vec());
                    store.slot_mut(cat, set).client_cert = parts.next().filter(|p| !p.is_empty()).map(|p| p.to_vec());
                    store.slot_mut(cat, set).client_key = parts.next().filter(|p| !p.is_empty()).map(|p| p.to_vec());
                }
            }
        }
        store
    }

    pub fn slot(&self, cat: Category, set: CredSet) -> &Slot {
        &self.slots[idx(cat)][set_idx(set)]
    }

    fn slot_mut(&mut self, cat: Category, set: CredSet) -> &mut Slot {
        &mut self.slots[idx(cat)][set_idx(set)]
    }

    fn uri_path(&self, cat: Category, set: CredSet) -> PathBuf {
        self.home_dir.join(format!("{}.{}.uri", cat.tag(), set.tag()))
    }

    /// Update the in-memory slot and best-effort persist the URI to disk so
    /// it survives a restart. A failed write is logged, not fatal: the URI
    /// still takes effect for the rest of this process's lifetime.
    pub fn save_uri(&mut self, cat: Category, set: CredSet, uri: &str) {
        self.slot_mut(cat, set).uri = Some(uri.to_string());
        if let Err(e) = std::fs::write(self.uri_path(cat, set), uri) {
            tracing::warn!(error = %e, "failed to persist credential URI");
        }
    }

    /// CRC-32/IEEE over the slot's credential blob (trust anchors + client
    /// cert + client key concatenated), `0` if nothing is staged yet.
    pub fn crc(&self, cat: Category, set: CredSet) -> u32 {
        let slot = self.slot(cat, set);
        let mut hasher = crc32fast::Hasher::new();
        for part in [&slot.trust_anchors, &slot.client_cert, &slot.client_key].into_iter().flatten() {
            hasher.update(part);
        }
        hasher.finalize()
    }

    fn stage_path(&self, cat: Category) -> PathBuf {
        self.home_dir.join(format!("{}.reg.stage", cat.tag()))
    }

    fn live_path(&self, cat: Category, set: CredSet) -> PathBuf {
        self.home_dir.join(format!("{}.{}", cat.tag(), set.tag()))
    }

    /// Open a staged file for `cat`'s incoming (always REG-bound) credential
    /// update, truncating any previous stage.
    pub async fn cred_start(&mut self, cat: Category, declared_len: usize) -> Result<(), CredError> {
        let path = self.stage_path(cat);
        tokio::fs::File::create(&path).await?;
        self.in_progress = Some(InProgress {
            category: cat,
            declared_len,
            path,
        });
        Ok(())
    }

    /// Write `data` at byte offset `off` of the currently staged credential.
    pub async fn cred_write(&mut self, cat: Category, data: &[u8], off: usize, len: usize) -> Result<(), CredError> {
        let progress = self.in_progress.as_ref().filter(|p| p.category == cat).ok_or(CredError::NotStarted)?;
        if off + len > progress.declared_len {
            return Err(CredError::OutOfRange {
                off,
                len,
                declared: progress.declared_len,
            });
        }
        let mut f = tokio::fs::OpenOptions::new().write(true).open(&progress.path).await?;
        f.seek(std::io::SeekFrom::Start(off as u64)).await?;
        f.write_all(&data[..len]).await?;
        Ok(())
    }

    /// Finalize a staged credential: read it back, parse it into the REG
    /// slot's TLS material, and clear the in-progress marker.
    pub async fn cred_complete(&mut self, cat: Category, _total_len: usize) -> Result<(), CredError> {
        let path = match self.in_progress.take() {
            Some(p) if p.category == cat => p.path,
            _ => return Err(CredError::NotStarted),
        };
        let blob = tokio::fs::read(&path).await?;
        // The staged blob is a newline-delimited bundle: URI, then PEM trust
        // anchors, client cert, and client key. A bundle with fewer parts
        // simply leaves the trailing slot fields unset.
        let mut parts = blob.split(|&b| b == 0x00);
        let trust_anchors = parts.next().filter(|p| !p.is_empty()).map(|p| p.to_vec());
        let client_cert = parts.next().filter(|p| !p.is_empty()).map(|p| p.to_vec());
        let client_key = parts.next().filter(|p| !p.is_empty()).map(|p| p.to_vec());

        let slot = self.slot_mut(cat, CredSet::Reg);
        slot.trust_anchors = trust_anchors;
        slot.client_cert = client_cert;
        slot.client_key = client_key;
        Ok(())
    }

    /// Promote the current REG set to BAK, preserving it before any staged
    /// write lands. Must happen at most once per session, before the first
    /// staged write, only when the active credential set is REG (spec.md §8
    /// property 2).
    pub fn backup_config(&mut self, cat: Category) {
        let reg = self.slot(cat, CredSet::Reg).clone();
        *self.slot_mut(cat, CredSet::Bak) = reg;
    }

    /// Discard any staged-but-uncommitted files for a fresh session.
    pub fn reset_config_update(&mut self) {
        self.in_progress = None;
    }

    /// Atomically promote every staged file to its live path. Called exactly
    /// once per successful session, before firmware staging begins.
    pub async fn commit_config_update(&self) -> Result<(), CredError> {
        for cat in [Category::Cups, Category::Tc] {
            let stage = self.stage_path(cat);
            if stage.exists() {
                let live = self.live_path(cat, CredSet::Reg);
                tokio::fs::rename(&stage, &live).await?;
            }
        }
        Ok(())
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn stages_then_commits_credential() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::new(dir.path().to_path_buf());

        let payload = b"uri://example\0-----BEGIN CERT-----\0";
        store.cred_start(Category::Cups, payload.len()).await.unwrap();
        store.cred_write(Category::Cups, payload, 0, payload.len()).await.unwrap();
        store.cred_complete(Category::Cups, payload.len()).await.unwrap();

        assert!(store.slot(Category::Cups, CredSet::Reg).trust_anchors.is_some());
        store.commit_config_update().await.unwrap();
        assert!(dir.path().join("cups.reg").exists());
    }

    #[test]
    fn rotation_order_is_reg_bak_boot() {
        assert_eq!(CredSet::Reg.rotate(), CredSet::Bak);
        assert_eq!(CredSet::Bak.rotate(), CredSet::Boot);
        assert_eq!(CredSet::Boot.rotate(), CredSet::Reg);
    }

    #[test]
    fn backup_promotes_reg_into_bak() {
        let mut store = CredentialStore::new(PathBuf::from("/tmp"));
        store.save_uri(Category::Cups, CredSet::Reg, "http://a");
        store.backup_config(Category::Cups);
        assert_eq!(store.slot(Category::Cups, CredSet::Bak).uri.as_deref(), Some("http://a"));
    }

    #[test]
    fn crc_is_zero_for_empty_slot() {
        let store = CredentialStore::new(PathBuf::from("/tmp"));
        assert_eq!(store.crc(Category::Cups, CredSet::Reg), 0);
    }
}
