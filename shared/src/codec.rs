//! Length-prefixed JSON framing.
//!
//! A frame is a 4-byte big-endian payload length followed by the UTF-8 JSON
//! envelope. There is no delimiter between frames and no maximum frame size.

use crate::protocol::{timestamp_now, Envelope, WireMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    /// The stream ended or failed before a complete frame arrived.
    #[error("framing error: {0}")]
    Framing(#[source] io::Error),
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    /// A well-formed frame whose `type` is not understood.
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("payload of {0} bytes does not fit a 4-byte length prefix")]
    Oversized(usize),
}

impl CodecError {
    /// True when the peer closed the connection between or inside frames.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CodecError::Framing(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }

    /// False only for errors after which the stream is still aligned on a
    /// frame boundary and the session can keep reading.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CodecError::UnknownType(_))
    }
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a, M> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a M,
    timestamp: &'a str,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: String,
}

/// Serializes `message` with the current timestamp into a complete frame.
pub fn encode<M: WireMessage>(message: &M) -> Result<Vec<u8>, CodecError> {
    frame(message, &timestamp_now())
}

pub fn encode_envelope<M: WireMessage>(envelope: &Envelope<M>) -> Result<Vec<u8>, CodecError> {
    frame(&envelope.message, &envelope.timestamp)
}

fn frame<M: WireMessage>(message: &M, timestamp: &str) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(&OutgoingEnvelope {
        kind: message.kind(),
        data: message,
        timestamp,
    })?;
    let len = u32::try_from(payload.len()).map_err(|_| CodecError::Oversized(payload.len()))?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Parses a frame payload (without its length prefix).
pub fn decode_payload<M: WireMessage>(payload: &[u8]) -> Result<Envelope<M>, CodecError> {
    let text = std::str::from_utf8(payload)?;
    let incoming: IncomingEnvelope = serde_json::from_str(text)?;
    let message = M::from_parts(&incoming.kind, incoming.data)?;
    Ok(Envelope {
        message,
        timestamp: incoming.timestamp,
    })
}

/// Parses one complete frame, length prefix included.
pub fn decode<M: WireMessage>(frame: &[u8]) -> Result<Envelope<M>, CodecError> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(CodecError::Framing(io::ErrorKind::UnexpectedEof.into()));
    }
    let (prefix, rest) = frame.split_at(LENGTH_PREFIX_SIZE);
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if rest.len() < len {
        return Err(CodecError::Framing(io::ErrorKind::UnexpectedEof.into()));
    }
    decode_payload(&rest[..len])
}

/// Reads exactly one frame's payload, waiting for partial reads to complete.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader
        .read_exact(&mut prefix)
        .await
        .map_err(CodecError::Framing)?;

    let len = u32::from_be_bytes(prefix) as usize;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(CodecError::Framing)?;
    Ok(payload)
}

pub async fn read_envelope<M, R>(reader: &mut R) -> Result<Envelope<M>, CodecError>
where
    M: WireMessage,
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader).await?;
    decode_payload(&payload)
}

pub async fn read_message<M, R>(reader: &mut R) -> Result<M, CodecError>
where
    M: WireMessage,
    R: AsyncRead + Unpin,
{
    Ok(read_envelope(reader).await?.message)
}

/// Writes an already encoded frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

pub async fn write_message<M, W>(writer: &mut W, message: &M) -> Result<(), CodecError>
where
    M: WireMessage,
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    write_frame(writer, &frame)
        .await
        .map_err(CodecError::Framing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        ChatText, ClientMessage, ControlInput, ErrorNotice, JoinRequest, ReadyStatus,
        ServerMessage, Welcome,
    };
    use crate::{Car, CarColor, ChatMessage, Player, RaceState, Winner, START_POSITIONS};
    use tokio_test::io::Builder;

    fn sample_state() -> RaceState {
        let mut state = RaceState::default();
        let mut car = Car::new(START_POSITIONS[1], CarColor::Blue);
        car.speed = 0.6;
        car.angle = 355.0;
        state.players.insert(
            1,
            Player {
                id: 1,
                nickname: "racer".to_string(),
                car,
            },
        );
        state.players_ready.insert(1, true);
        state.game_active = true;
        state.race_start_time = Some(1_700_000_000.25);
        state.winner = Some(Winner {
            player_id: 1,
            nickname: "racer".to_string(),
            time: "12.34".to_string(),
        });
        state.race_finished = true;
        state
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let frame = encode(&ClientMessage::Ready(ReadyStatus { ready: true })).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - LENGTH_PREFIX_SIZE);

        let json: Value = serde_json::from_slice(&frame[LENGTH_PREFIX_SIZE..]).unwrap();
        assert_eq!(json["type"], "ready");
        assert_eq!(json["data"]["ready"], true);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_client_messages_roundtrip() {
        let messages = vec![
            ClientMessage::Init(JoinRequest {
                nickname: Some("alice".to_string()),
                car_color: CarColor::Green,
            }),
            ClientMessage::Control(ControlInput {
                up: true,
                left: true,
                finish_collision: true,
                finish_y: Some(12.5),
                ..ControlInput::default()
            }),
            ClientMessage::Chat(ChatText {
                message: "gg".to_string(),
            }),
            ClientMessage::Ready(ReadyStatus { ready: false }),
        ];

        for message in messages {
            let envelope = Envelope::new(message);
            let frame = encode_envelope(&envelope).unwrap();
            let decoded: Envelope<ClientMessage> = decode(&frame).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn test_server_messages_roundtrip() {
        let messages = vec![
            ServerMessage::InitConfirm(Welcome {
                player_id: 1,
                game_state: sample_state(),
            }),
            ServerMessage::Error(ErrorNotice {
                message: "Server is full".to_string(),
            }),
            ServerMessage::State(sample_state()),
            ServerMessage::Chat(ChatMessage {
                sender: "system".to_string(),
                message: "racer joined the game".to_string(),
                time: "2024-05-01T10:00:00.000000".to_string(),
            }),
        ];

        for message in messages {
            let envelope = Envelope::new(message);
            let frame = encode_envelope(&envelope).unwrap();
            let decoded: Envelope<ServerMessage> = decode(&frame).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[tokio::test]
    async fn test_read_frame_handles_partial_reads() {
        let frame = encode(&ClientMessage::Chat(ChatText {
            message: "split across reads".to_string(),
        }))
        .unwrap();
        let mut reader = Builder::new()
            .read(&frame[..2])
            .read(&frame[2..7])
            .read(&frame[7..])
            .build();

        let message: ClientMessage = read_message(&mut reader).await.unwrap();
        assert_eq!(
            message,
            ClientMessage::Chat(ChatText {
                message: "split across reads".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_read_consecutive_frames() {
        let first = encode(&ClientMessage::Ready(ReadyStatus { ready: true })).unwrap();
        let second = encode(&ClientMessage::Control(ControlInput::default())).unwrap();
        let mut joined = first.clone();
        joined.extend_from_slice(&second);
        let mut reader = Builder::new().read(&joined).build();

        let a: ClientMessage = read_message(&mut reader).await.unwrap();
        let b: ClientMessage = read_message(&mut reader).await.unwrap();
        assert_eq!(a, ClientMessage::Ready(ReadyStatus { ready: true }));
        assert_eq!(b, ClientMessage::Control(ControlInput::default()));
    }

    #[tokio::test]
    async fn test_closed_before_prefix_is_framing_error() {
        let mut reader = Builder::new().read(&[0, 0]).build();
        let result: Result<ClientMessage, _> = read_message(&mut reader).await;
        let error = result.unwrap_err();
        assert!(matches!(error, CodecError::Framing(_)));
        assert!(error.is_disconnect());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_framing_error() {
        let frame = encode(&ClientMessage::Ready(ReadyStatus { ready: true })).unwrap();
        let mut reader = Builder::new().read(&frame[..frame.len() - 3]).build();
        let result: Result<ClientMessage, _> = read_message(&mut reader).await;
        assert!(matches!(result, Err(CodecError::Framing(_))));
    }

    #[test]
    fn test_invalid_utf8_is_protocol_error() {
        let result: Result<Envelope<ClientMessage>, _> = decode_payload(&[0xff, 0xfe, 0x7b]);
        assert!(matches!(result, Err(CodecError::Utf8(_))));
    }

    #[test]
    fn test_invalid_json_is_protocol_error() {
        let result: Result<Envelope<ClientMessage>, _> = decode_payload(b"{\"type\": ");
        let error = result.unwrap_err();
        assert!(matches!(error, CodecError::Json(_)));
        assert!(error.is_fatal());
    }

    #[test]
    fn test_unknown_type_is_not_fatal() {
        let payload = br#"{"type": "ping", "data": {}, "timestamp": "x"}"#;
        let error = decode_payload::<ClientMessage>(payload).unwrap_err();
        assert!(matches!(error, CodecError::UnknownType(_)));
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_decode_short_frame() {
        assert!(matches!(
            decode::<ClientMessage>(&[0, 0, 0]),
            Err(CodecError::Framing(_))
        ));
        assert!(matches!(
            decode::<ClientMessage>(&[0, 0, 0, 9, b'{']),
            Err(CodecError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let frame = encode(&ServerMessage::Error(ErrorNotice {
            message: "Server is full".to_string(),
        }))
        .unwrap();
        let mut writer = Builder::new().write(&frame).build();
        write_frame(&mut writer, &frame).await.unwrap();
    }
}
