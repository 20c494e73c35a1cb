use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use reef_core::ids::{self, DatasetId};
use reef_core::store::Store;
use reef_core::types::DatasetRow;
use reef_core::Error;

/// Name of the always-present dataset with zero-byte content, used by jobs
/// and templates that declare none.
pub const EMPTY_DATASET_NAME: &str = "Empty Dataset";

/// Content-addressed dataset store: a row in the durable store plus a blob
/// at `<root>/<id>.bin`. Inserts are idempotent by id.
#[derive(Clone)]
pub struct DatasetStore {
    root: PathBuf,
    store: Arc<Store>,
}

impl DatasetStore {
    pub fn new(root: &Path, store: Arc<Store>) -> Result<Self, Error> {
        std::fs::create_dir_all(root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(root, std::fs::Permissions::from_mode(0o700));
        }
        Ok(Self {
            root: root.to_path_buf(),
            store,
        })
    }

    fn path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.bin"))
    }

    /// Store a dataset. Returns its content-derived id; adding the same
    /// name + content again yields the same id and a single durable row.
    pub fn add(&self, name: &str, data: &[u8]) -> Result<DatasetId, Error> {
        let id = ids::dataset_id(name, data);

        std::fs::write(self.path(&id), data)?;

        let already_existed = self.store.add_dataset(&DatasetRow {
            id: id.clone(),
            name: name.to_string(),
            size: data.len() as u32,
        })?;
        if already_existed {
            debug!(dataset = %id, "dataset already registered");
        } else {
            info!(dataset = %id, name, bytes = data.len(), "dataset added");
        }

        Ok(id)
    }

    pub fn delete(&self, id: &DatasetId) -> Result<bool, Error> {
        if !self.store.delete_dataset(id)? {
            return Ok(false);
        }
        std::fs::remove_file(self.path(id))?;
        Ok(true)
    }

    pub fn exists(&self, id: &str) -> Result<bool, Error> {
        match std::fs::metadata(self.path(id)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load(&self, id: &str) -> Result<Option<Vec<u8>>, Error> {
        match std::fs::read(self.path(id)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Guarantee the empty dataset exists and return its id.
    pub fn bootstrap_empty(&self) -> Result<DatasetId, Error> {
        self.add(EMPTY_DATASET_NAME, &[])
    }
}
