use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use reef_core::ids::WasmHash;
use reef_core::Error;

/// Filesystem cache of compiled Wasm artifacts, content-addressed by the
/// source hash. Multiple jobs share one artifact.
#[derive(Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: &Path) -> Result<Self, Error> {
        std::fs::create_dir_all(root)?;
        set_owner_only(root);
        Ok(Self { root: root.to_path_buf() })
    }

    fn path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.wasm"))
    }

    /// The cached artifact, or `None` if absent. An empty file is treated as
    /// absent and removed, so a failed write can never start a job.
    pub fn read(&self, hash: &WasmHash) -> Result<Option<Vec<u8>>, Error> {
        let path = self.path(hash);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(%hash, "no cached artifact");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.is_empty() {
            warn!(%hash, "removing empty artifact cache file");
            std::fs::remove_file(&path)?;
            return Ok(None);
        }

        debug!(%hash, bytes = bytes.len(), "loaded cached artifact");
        Ok(Some(bytes))
    }

    /// Persist an artifact atomically (temp file + rename).
    pub fn write(&self, hash: &WasmHash, bytes: &[u8]) -> Result<(), Error> {
        let tmp = self.root.join(format!("{hash}.wasm.tmp"));
        std::fs::write(&tmp, bytes)?;
        set_owner_only(&tmp);
        std::fs::rename(&tmp, self.path(hash))?;
        debug!(%hash, bytes = bytes.len(), "cached artifact");
        Ok(())
    }
}

fn set_owner_only(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }
}
