use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use reef_core::ids::DatasetId;
use reef_core::types::Language;
use reef_core::Error;

use crate::datasets::DatasetStore;

/// A ready-made job the UI offers as a starting point. Loaded once at boot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub source: String,
    pub dataset_id: Option<DatasetId>,
    pub language: Language,
}

/// `template.json` inside each template directory. `source` and `dataset`
/// are file names relative to that directory.
#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    language: Language,
    source: String,
    dataset: Option<String>,
}

/// Read every template from the templates directory, registering referenced
/// datasets (idempotent). Directories without a manifest are skipped with a
/// warning; a malformed manifest fails the boot.
pub fn load_templates(dir: &Path, datasets: &DatasetStore) -> Result<Vec<Template>, Error> {
    let mut templates = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let manifest_path = entry.path().join("template.json");
        if !manifest_path.exists() {
            warn!(path = ?entry.path(), "template directory without template.json, skipping");
            continue;
        }

        let raw = std::fs::read_to_string(&manifest_path)?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .map_err(|e| Error::System(format!("malformed manifest {manifest_path:?}: {e}")))?;

        let source = std::fs::read_to_string(entry.path().join(&manifest.source))?;

        let dataset_id = match &manifest.dataset {
            Some(file) => {
                let data = std::fs::read(entry.path().join(file))?;
                Some(datasets.add(file, &data)?)
            }
            None => None,
        };

        let mut hasher = Sha256::new();
        hasher.update(manifest.name.as_bytes());
        hasher.update(source.as_bytes());
        hasher.update(manifest.language.to_string().as_bytes());

        templates.push(Template {
            id: hex::encode(hasher.finalize()),
            name: manifest.name,
            source,
            dataset_id,
            language: manifest.language,
        });
    }

    templates.sort_by(|a, b| a.name.cmp(&b.name));
    info!(count = templates.len(), "templates loaded");
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_core::store::Store;
    use std::sync::Arc;

    fn write_template(
        root: &Path,
        dir: &str,
        manifest: &str,
        source: (&str, &str),
        dataset: Option<(&str, &[u8])>,
    ) {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("template.json"), manifest).unwrap();
        std::fs::write(path.join(source.0), source.1).unwrap();
        if let Some((name, data)) = dataset {
            std::fs::write(path.join(name), data).unwrap();
        }
    }

    #[test]
    fn loads_templates_and_registers_datasets() {
        let templates_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let datasets = DatasetStore::new(data_dir.path(), store).unwrap();

        write_template(
            templates_dir.path(),
            "hello",
            r#"{"name":"Hello World","language":"rust","source":"main.rs"}"#,
            ("main.rs", "fn main() {}"),
            None,
        );
        write_template(
            templates_dir.path(),
            "avg",
            r#"{"name":"Average","language":"c","source":"main.c","dataset":"numbers.bin"}"#,
            ("main.c", "int main() { return 0; }"),
            Some(("numbers.bin", &[1, 2, 3])),
        );

        let templates = load_templates(templates_dir.path(), &datasets).unwrap();
        assert_eq!(templates.len(), 2);

        // Sorted by name.
        assert_eq!(templates[0].name, "Average");
        assert_eq!(templates[1].name, "Hello World");

        let ds = templates[0].dataset_id.as_ref().unwrap();
        assert!(datasets.exists(ds).unwrap());
        assert_eq!(templates[1].dataset_id, None);

        // Deterministic ids.
        let again = load_templates(templates_dir.path(), &datasets).unwrap();
        assert_eq!(again[0].id, templates[0].id);
    }

    #[test]
    fn skips_directories_without_manifest() {
        let templates_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let datasets = DatasetStore::new(data_dir.path(), store).unwrap();

        std::fs::create_dir_all(templates_dir.path().join("empty")).unwrap();
        let templates = load_templates(templates_dir.path(), &datasets).unwrap();
        assert!(templates.is_empty());
    }
}
