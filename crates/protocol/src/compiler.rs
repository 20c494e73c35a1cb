use serde::{Deserialize, Serialize};

/// Request to the external compiler service. One request per connection;
/// framed with [`crate::codec::write_frame`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompileRequest {
    pub language: String,
    pub source: String,
}

/// Reply from the compiler service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CompileResponse {
    /// Compiled Wasm bytecode.
    Artifact(Vec<u8>),
    /// The program failed to compile; the text is shown to the submitter.
    CompilerError(String),
    /// The service itself failed.
    SystemError(String),
}
