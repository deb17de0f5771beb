use std::{io, path::PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::DownloadSink;

/// Saves downloads into a directory. Bytes are staged in a hidden `.part`
/// file which is renamed into place or removed before `save` returns.
pub struct FsDownloadSink {
    dir: PathBuf,
}

impl FsDownloadSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn is_plain_file_name(filename: &str) -> bool {
    !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\'])
}

#[async_trait]
impl DownloadSink for FsDownloadSink {
    async fn save(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        if !is_plain_file_name(filename) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to save download under '{filename}'"),
            ));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(filename);
        let staging = self.dir.join(format!(".{filename}.part"));

        let written = async {
            tokio::fs::write(&staging, bytes).await?;
            tokio::fs::rename(&staging, &target).await
        }
        .await;

        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(err);
        }

        info!(path = %target.display(), bytes = bytes.len(), "saved download");
        Ok(target)
    }
}
