use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::types::Language;

/// 64-character lowercase hex, SHA-256 of the submission tuple and time.
pub type JobId = String;
/// 64-character lowercase hex, SHA-256 of name + content.
pub type DatasetId = String;
/// 64-character lowercase hex, SHA-256 of source + language name.
pub type WasmHash = String;

/// Identity of a connected worker node: SHA-256 of its endpoint IP and name.
///
/// Kept as raw bytes internally; hex on the wire and in JSON.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub fn derive(endpoint_ip: &str, node_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(endpoint_ip.as_bytes());
        hasher.update(node_name.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| serde::de::Error::custom("node id must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Content hash of a compiled artifact: SHA-256 over source, then language name.
pub fn wasm_hash(source: &str, language: Language) -> WasmHash {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(language.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Content address of a dataset: SHA-256 over name, then content.
pub fn dataset_id(name: &str, content: &[u8]) -> DatasetId {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Job id: SHA-256 over the submission time and the canonical (bincode)
/// encoding of the submission tuple. Deterministic for a fixed time.
pub fn job_id(
    submitted: DateTime<Utc>,
    language: Language,
    source: &str,
    name: &str,
    dataset: &DatasetId,
    owner: &str,
) -> JobId {
    let tuple = (language.to_string(), source, name, dataset, owner);
    // Bincode of a tuple of strings cannot fail.
    let encoded = bincode::serialize(&tuple).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(submitted.to_rfc3339().as_bytes());
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn node_id_is_deterministic_and_hex() {
        let a = NodeId::derive("10.0.0.1", "alpha");
        let b = NodeId::derive("10.0.0.1", "alpha");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);

        let c = NodeId::derive("10.0.0.2", "alpha");
        assert_ne!(a, c);
    }

    #[test]
    fn node_id_roundtrips_through_json() {
        let id = NodeId::derive("10.0.0.1", "alpha");
        let json = serde_json::to_string(&id).unwrap();
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn wasm_hash_distinguishes_languages() {
        let rust = wasm_hash("fn main() {}", Language::Rust);
        let c = wasm_hash("fn main() {}", Language::C);
        assert_ne!(rust, c);
        assert_eq!(rust.len(), 64);
    }

    #[test]
    fn dataset_id_depends_on_name_and_content() {
        let a = dataset_id("X", &[0xaa, 0xbb]);
        let b = dataset_id("X", &[0xaa, 0xbb]);
        let c = dataset_id("Y", &[0xaa, 0xbb]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn job_id_is_deterministic_for_fixed_time() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ds = "0".repeat(64);
        let a = job_id(at, Language::Rust, "src", "fib", &ds, "owner");
        let b = job_id(at, Language::Rust, "src", "fib", &ds, "owner");
        assert_eq!(a, b);

        let later = at + chrono::Duration::seconds(1);
        let c = job_id(later, Language::Rust, "src", "fib", &ds, "owner");
        assert_ne!(a, c);
    }
}
