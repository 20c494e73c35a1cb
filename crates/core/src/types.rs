use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DatasetId, JobId, WasmHash};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Starting,
    Running,
    Done,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Starting => write!(f, "starting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
        }
    }
}

/// Source languages the compiler service accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    C,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Rust => write!(f, "rust"),
            Language::C => write!(f, "c"),
        }
    }
}

/// Origin of a job log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Program,
    Node,
    System,
}

impl LogKind {
    pub fn as_u16(&self) -> u16 {
        match self {
            LogKind::Program => 0,
            LogKind::Node => 1,
            LogKind::System => 2,
        }
    }
}

impl TryFrom<u16> for LogKind {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0 => Ok(LogKind::Program),
            1 => Ok(LogKind::Node),
            2 => Ok(LogKind::System),
            other => Err(other),
        }
    }
}

/// Interpretation of a result's content bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    JsonString,
    PlainString,
    Int64,
    Bytes,
}

impl ContentType {
    pub fn as_u16(&self) -> u16 {
        match self {
            ContentType::JsonString => 0,
            ContentType::PlainString => 1,
            ContentType::Int64 => 2,
            ContentType::Bytes => 3,
        }
    }
}

impl TryFrom<u16> for ContentType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0 => Ok(ContentType::JsonString),
            1 => Ok(ContentType::PlainString),
            2 => Ok(ContentType::Int64),
            3 => Ok(ContentType::Bytes),
            other => Err(other),
        }
    }
}

/// Persisted job row. Runtime state (status, progress, logs) lives in the
/// manager's in-memory registry while the job is non-terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRow {
    pub id: JobId,
    pub name: String,
    pub submitted: DateTime<Utc>,
    #[serde(rename = "wasmId")]
    pub wasm_hash: WasmHash,
    pub dataset_id: DatasetId,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub job_id: JobId,
    pub success: bool,
    pub content: Vec<u8>,
    pub content_type: ContentType,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JobWithResult {
    pub job: JobRow,
    pub result: Option<ResultRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRow {
    pub kind: LogKind,
    pub created: DateTime<Utc>,
    pub content: String,
    pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRow {
    pub id: DatasetId,
    pub name: String,
    /// Size of the dataset in bytes.
    pub size: u32,
}

/// Static facts about a node, learned during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(rename = "endpointIP")]
    pub endpoint_ip: String,
    pub name: String,
    pub num_workers: u16,
}
