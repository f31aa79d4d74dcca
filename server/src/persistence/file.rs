//! JSON file snapshot.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use duel_shared::Player;
use log::debug;

use super::{LocalMirror, StorageError};

/// Stores the snapshot as a JSON document at a fixed path
#[derive(Debug, Clone)]
pub struct JsonFileMirror {
    path: PathBuf,
}

impl JsonFileMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LocalMirror for JsonFileMirror {
    async fn read_snapshot(&self) -> Result<Option<Player>, StorageError> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if json.trim().is_empty() {
            return Ok(None);
        }

        let player: Player = serde_json::from_str(&json)?;
        Ok(Some(player.resync_level()))
    }

    async fn write_snapshot(&self, player: &Player) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(player)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so a crash never leaves a half-written snapshot
        let temp = self.temp_path();
        tokio::fs::write(&temp, &json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!("Saved snapshot for {} to {}", player.id, self.path.display());
        Ok(())
    }
}
