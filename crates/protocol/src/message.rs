use serde::{Deserialize, Serialize};

/// Messages the manager sends to a node. The enum variant is the top-level
/// kind tag on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MessageToNode {
    InitHandshake,
    AssignId { node_id: [u8; 32] },
    StartJob(JobStart),
    AbortJob { job_id: String },
    Ping,
}

/// Everything a worker needs to start (or resume) a job. `progress` and
/// `interpreter_state` are non-zero when a parked job is re-dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStart {
    pub worker_index: u32,
    pub job_id: String,
    pub program_bytecode: Vec<u8>,
    pub dataset_id: String,
    pub progress: f32,
    pub interpreter_state: Vec<u8>,
}

/// Messages a node sends to the manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MessageFromNode {
    HandshakeResponse { num_workers: u16, node_name: String },
    StateSync(StateSync),
    JobResult(JobResult),
    Ping,
}

/// Periodic snapshot of one worker: progress, logs since the last sync and
/// the interpreter state needed to resume elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSync {
    pub worker_index: u16,
    pub progress: f32,
    pub interpreter_state: Vec<u8>,
    pub logs: Vec<LogRecord>,
}

/// A single log line inside a state sync. `log_kind` is validated against
/// the known kinds by the receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub log_kind: u16,
    pub content: String,
}

/// Terminal outcome of a job on one worker. `content_type` is validated by
/// the receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub worker_index: u16,
    pub success: bool,
    pub content_type: u16,
    pub contents: Vec<u8>,
}
