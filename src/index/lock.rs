use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::{RagError, Result};

pub(crate) const LOCK_FILE_NAME: &str = ".rebuild.lock";

/// Locks without a heartbeat for this long are assumed to belong to a crashed process
pub(crate) const STALE_LOCK_AGE: Duration = Duration::from_secs(10 * 60);

/// Exclusive right to rebuild or clear one index directory.
///
/// Held as a file created with `create_new` whose contents identify the
/// holder. The holder calls [`RebuildLock::heartbeat`] while it works so the
/// lock never looks stale; dropping the guard removes the file only if it is
/// still ours.
#[derive(Debug)]
pub struct RebuildLock {
    path: PathBuf,
    token: String,
}

impl RebuildLock {
    /// Take the lock in `dir`, replacing it if it is stale
    #[inline]
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| RagError::from_io(e, dir))?;
        let path = dir.join(LOCK_FILE_NAME);

        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if !is_stale(&path) {
                    return Err(RagError::IndexLocked(path));
                }
                warn!("Replacing stale rebuild lock {}", path.display());
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(RagError::from_io(e, &path)),
                }
                Self::create(&path).map_err(|e| {
                    if e.kind() == ErrorKind::AlreadyExists {
                        RagError::IndexLocked(path.clone())
                    } else {
                        RagError::from_io(e, &path)
                    }
                })
            }
            Err(err) => Err(RagError::from_io(err, &path)),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let token = format!(
            "pid={}\ncreated_at={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
        );
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(token.as_bytes())?;
        debug!("Acquired rebuild lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            token,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the lock file on disk is still the one this guard created
    #[inline]
    pub fn is_held(&self) -> bool {
        fs::read_to_string(&self.path).is_ok_and(|content| content == self.token)
    }

    /// Confirm the lock is still ours and push its staleness deadline forward.
    ///
    /// Fails with `IndexLocked` once another process has taken it over.
    #[inline]
    pub fn heartbeat(&self) -> Result<()> {
        if !self.is_held() {
            warn!("Rebuild lock {} was taken over", self.path.display());
            return Err(RagError::IndexLocked(self.path.clone()));
        }
        OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|file| file.set_modified(SystemTime::now()))
            .map_err(|e| RagError::from_io(e, &self.path))
    }
}

impl Drop for RebuildLock {
    fn drop(&mut self) {
        if !self.is_held() {
            warn!(
                "Not removing rebuild lock {}: it belongs to another process",
                self.path.display()
            );
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove rebuild lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released rebuild lock {}", self.path.display());
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}
