use tokio::net::TcpStream;
use tracing::{debug, info};

use reef_core::ids::{self, WasmHash};
use reef_core::types::Language;
use reef_core::Error;
use reef_protocol::codec::{read_frame, write_frame};
use reef_protocol::compiler::{CompileRequest, CompileResponse};

use crate::artifacts::ArtifactCache;

/// Client for the external compiler service. Each request opens a fresh
/// framed TCP connection and closes it on completion; the artifact cache is
/// consulted first and fed on success.
#[derive(Clone)]
pub struct CompilerClient {
    host: String,
    port: u16,
    cache: ArtifactCache,
}

#[derive(Debug)]
pub enum CompileOutcome {
    Artifact { wasm: Vec<u8>, hash: WasmHash },
    /// Classified separately from system errors; shown to the submitter.
    CompilerError(String),
}

impl CompilerClient {
    pub fn new(host: String, port: u16, cache: ArtifactCache) -> Self {
        Self { host, port, cache }
    }

    pub async fn compile(
        &self,
        language: Language,
        source: &str,
    ) -> Result<CompileOutcome, Error> {
        let hash = ids::wasm_hash(source, language);

        if let Some(wasm) = self.cache.read(&hash)? {
            debug!(%hash, "compile served from the artifact cache");
            return Ok(CompileOutcome::Artifact { wasm, hash });
        }

        let mut stream = self.connect().await?;
        write_frame(
            &mut stream,
            &CompileRequest {
                language: language.to_string(),
                source: source.to_string(),
            },
        )
        .await
        .map_err(|e| Error::System(format!("compiler request: {e}")))?;

        let response: CompileResponse = read_frame(&mut stream)
            .await
            .map_err(|e| Error::System(format!("compiler response: {e}")))?;

        match response {
            CompileResponse::Artifact(wasm) => {
                if wasm.is_empty() {
                    return Err(Error::System("compiler returned an empty artifact".to_string()));
                }
                self.cache.write(&hash, &wasm)?;
                Ok(CompileOutcome::Artifact { wasm, hash })
            }
            CompileResponse::CompilerError(text) => Ok(CompileOutcome::CompilerError(text)),
            CompileResponse::SystemError(text) => {
                Err(Error::System(format!("compiler service: {text}")))
            }
        }
    }

    /// Connect-only smoke test, run once at startup.
    pub async fn smoke_test(&self) -> Result<(), Error> {
        self.connect().await?;
        info!(host = %self.host, port = self.port, "compiler service reachable");
        Ok(())
    }

    async fn connect(&self) -> Result<TcpStream, Error> {
        debug!(host = %self.host, port = self.port, "connecting to compiler service");
        Ok(TcpStream::connect((self.host.as_str(), self.port)).await?)
    }
}
