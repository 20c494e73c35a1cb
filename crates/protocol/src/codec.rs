use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::{MessageFromNode, MessageToNode};

/// Upper bound for a single frame; anything larger is a structural violation.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized(usize),

    #[error("transport failed: {0}")]
    Transport(#[from] std::io::Error),
}

pub fn encode_to_node(msg: &MessageToNode) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(msg)?)
}

pub fn decode_to_node(frame: &[u8]) -> Result<MessageToNode, ProtocolError> {
    Ok(bincode::deserialize(frame)?)
}

pub fn encode_from_node(msg: &MessageFromNode) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(msg)?)
}

pub fn decode_from_node(frame: &[u8]) -> Result<MessageFromNode, ProtocolError> {
    Ok(bincode::deserialize(frame)?)
}

/// Write one length-prefixed frame: u32 big-endian length, then the encoded
/// body. Used by the compiler RPC transport, where TCP gives no framing.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(body.len()));
    }

    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame written by [`write_frame`].
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{JobResult, JobStart, LogRecord, StateSync};

    fn to_node_messages() -> Vec<MessageToNode> {
        vec![
            MessageToNode::InitHandshake,
            MessageToNode::AssignId { node_id: [7u8; 32] },
            MessageToNode::StartJob(JobStart {
                worker_index: 0,
                job_id: "a".repeat(64),
                program_bytecode: vec![0x00, 0x61, 0x73, 0x6d],
                dataset_id: "b".repeat(64),
                progress: 0.25,
                interpreter_state: vec![1, 2, 3],
            }),
            MessageToNode::AbortJob { job_id: "a".repeat(64) },
            MessageToNode::Ping,
        ]
    }

    fn from_node_messages() -> Vec<MessageFromNode> {
        vec![
            MessageFromNode::HandshakeResponse {
                num_workers: 4,
                node_name: "worker-box".to_string(),
            },
            MessageFromNode::StateSync(StateSync {
                worker_index: 1,
                progress: 0.5,
                interpreter_state: vec![0x01],
                logs: vec![LogRecord {
                    log_kind: 0,
                    content: "half".to_string(),
                }],
            }),
            MessageFromNode::JobResult(JobResult {
                worker_index: 0,
                success: true,
                content_type: 2,
                contents: vec![0x2a, 0, 0, 0, 0, 0, 0, 0],
            }),
            MessageFromNode::Ping,
        ]
    }

    #[test]
    fn to_node_roundtrip() {
        for msg in to_node_messages() {
            let frame = encode_to_node(&msg).unwrap();
            assert_eq!(decode_to_node(&frame).unwrap(), msg);
        }
    }

    #[test]
    fn from_node_roundtrip() {
        for msg in from_node_messages() {
            let frame = encode_from_node(&msg).unwrap();
            assert_eq!(decode_from_node(&frame).unwrap(), msg);
        }
    }

    #[test]
    fn garbage_frames_are_rejected() {
        assert!(decode_from_node(&[]).is_err());
        assert!(decode_from_node(&[0xff; 3]).is_err());

        // A truncated frame must not decode.
        let frame = encode_from_node(&MessageFromNode::HandshakeResponse {
            num_workers: 2,
            node_name: "n".to_string(),
        })
        .unwrap();
        assert!(decode_from_node(&frame[..frame.len() - 1]).is_err());
    }

    #[tokio::test]
    async fn frames_roundtrip_over_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let msg = MessageFromNode::Ping;
        write_frame(&mut client, &msg).await.unwrap();
        let read: MessageFromNode = read_frame(&mut server).await.unwrap();
        assert_eq!(read, msg);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let bogus = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut client, &bogus)
            .await
            .unwrap();

        let read: Result<MessageFromNode, _> = read_frame(&mut server).await;
        assert!(matches!(read, Err(ProtocolError::Oversized(_))));
    }
}
