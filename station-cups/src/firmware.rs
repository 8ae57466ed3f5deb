//! Firmware staging: a temporary update file written during the `FEED_UPDATE`
//! segment, then renamed to the canonical path once fully received (spec.md
//! §4.5, §6 "Persisted state"). Grounded on the same stage-then-rename
//! discipline `station_config::CredentialStore` uses for credential files.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncSeekExt, AsyncWriteExt};

const STAGE_NAME: &str = "update.bi_";
const FINAL_NAME: &str = "update.bin";

pub struct FirmwareStage {
    stage_path: PathBuf,
    final_path: PathBuf,
    file: tokio::fs::File,
}

impl FirmwareStage {
    pub async fn start(temp_dir: &Path) -> std::io::Result<Self> {
        let stage_path = temp_dir.join(STAGE_NAME);
        let final_path = temp_dir.join(FINAL_NAME);
        let file = tokio::fs::File::create(&stage_path).await?;
        Ok(Self {
            stage_path,
            final_path,
            file,
        })
    }

    pub async fn write(&mut self, data: &[u8], off: usize) -> std::io::Result<()> {
        self.file.seek(std::io::SeekFrom::Start(off as u64)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    /// Close, rename to the canonical path, and flush the filesystem twice
    /// (spec.md §4.5 "close and rename ... flushing the filesystem twice"),
    /// then mark the image executable so the supervisor can exec it directly.
    pub async fn commit(mut self) -> std::io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        tokio::fs::rename(&self.stage_path, &self.final_path).await?;
        sync_dir(self.final_path.parent().unwrap_or(Path::new("."))).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = tokio::fs::metadata(&self.final_path).await?.permissions();
            perm.set_mode(perm.mode() | 0o111);
            tokio::fs::set_permissions(&self.final_path, perm).await?;
        }

        Ok(self.final_path)
    }
}

/// `sys_abortUpdate`: unlink whatever is staged, safe to call unconditionally.
pub async fn abort_update(temp_dir: &Path) {
    let stage = temp_dir.join(STAGE_NAME);
    let final_path = temp_dir.join(FINAL_NAME);
    let _ = tokio::fs::remove_file(&stage).await;
    let _ = tokio::fs::remove_file(&final_path).await;
}

async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    let f = tokio::fs::File::open(dir).await?;
    f.sync_all().await
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn stages_writes_then_commits_and_marks_executable() {
        let dir = tempfile::tempdir().unwrap();
        let mut stage = FirmwareStage::start(dir.path()).await.unwrap();
        stage.write(b"firmware-bytes", 0).await.unwrap();
        let final_path = stage.commit().await.unwrap();
        assert!(final_path.exists());
        assert_eq!(tokio::fs::read(&final_path).await.unwrap(), b"firmware-bytes");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = tokio::fs::metadata(&final_path).await.unwrap().permissions().mode();
            assert!(mode & 0o111 != 0);
        }
    }

    #[tokio::test]
    async fn abort_removes_staged_and_final() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(STAGE_NAME), b"x").await.unwrap();
        abort_update(dir.path()).await;
        assert!(!dir.path().join(STAGE_NAME).exists());
    }
}
