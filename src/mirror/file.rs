use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::warn;

use super::{mirror_key, PendingEntry, PendingMirror};
use crate::auth::UserId;

/// One JSON file per user key under a directory.
pub struct FileMirror {
    dir: PathBuf,
}

impl FileMirror {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create mirror directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}.json", mirror_key(user)))
    }
}

impl PendingMirror for FileMirror {
    fn load(&self, user: &UserId) -> Result<Option<PendingEntry>> {
        let path = self.entry_path(user);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read mirror {}", path.display()))
            }
        };

        match serde_json::from_str(&contents) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!("Ignoring corrupt mirror {}: {err}", path.display());
                Ok(None)
            }
        }
    }

    fn save(&self, user: &UserId, entry: &PendingEntry) -> Result<()> {
        let path = self.entry_path(user);
        let tmp = path.with_extension("json.tmp");
        let serialized = serde_json::to_string(entry)?;
        fs::write(&tmp, serialized)
            .with_context(|| format!("failed to write mirror {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move mirror into {}", path.display()))
    }

    fn clear(&self, user: &UserId) -> Result<()> {
        let path = self.entry_path(user);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove mirror {}", path.display()))
            }
        }
    }
}
