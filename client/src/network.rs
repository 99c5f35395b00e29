//! Client network layer: TCP connection, handshake and message I/O

use log::{info, warn};
use shared::codec::{read_message, write_message, CodecError};
use shared::protocol::{
    ChatText, ClientMessage, ControlInput, JoinRequest, ReadyStatus, ServerMessage, WireMessage,
};
use shared::RaceState;
use std::io;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect: {0}")]
    Connect(#[source] io::Error),
    /// The server answered the handshake with an `error` message.
    #[error("server rejected the connection: {0}")]
    Rejected(String),
    #[error("unexpected '{0}' message during handshake")]
    UnexpectedMessage(&'static str),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Read side of a connection.
pub struct Inbound {
    reader: BufReader<OwnedReadHalf>,
}

impl Inbound {
    /// Waits for the next server message. Not cancel safe: dropping the
    /// future mid-frame loses stream alignment.
    pub async fn recv(&mut self) -> Result<ServerMessage, CodecError> {
        read_message(&mut self.reader).await
    }
}

/// Write side of a connection.
pub struct Outbound {
    writer: OwnedWriteHalf,
}

impl Outbound {
    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), CodecError> {
        write_message(&mut self.writer, message).await
    }

    pub async fn send_control(&mut self, input: ControlInput) -> Result<(), CodecError> {
        self.send(&ClientMessage::Control(input)).await
    }

    pub async fn send_chat(&mut self, text: &str) -> Result<(), CodecError> {
        self.send(&ClientMessage::Chat(ChatText {
            message: text.to_string(),
        }))
        .await
    }

    pub async fn send_ready(&mut self, ready: bool) -> Result<(), CodecError> {
        self.send(&ClientMessage::Ready(ReadyStatus { ready })).await
    }
}

/// A connection that completed the `init` handshake.
pub struct RaceClient {
    player_id: u32,
    inbound: Inbound,
    outbound: Outbound,
}

impl RaceClient {
    /// Connects, sends `init` and waits for the server's answer. Returns the
    /// client together with the race state from `init_confirm`.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        request: JoinRequest,
    ) -> Result<(Self, RaceState), ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(ClientError::Connect)?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not disable Nagle: {}", e);
        }

        let (reader, writer) = stream.into_split();
        let mut inbound = Inbound {
            reader: BufReader::new(reader),
        };
        let mut outbound = Outbound { writer };

        outbound.send(&ClientMessage::Init(request)).await?;

        match inbound.recv().await? {
            ServerMessage::InitConfirm(welcome) => {
                info!("Connected as player {}", welcome.player_id);
                let client = RaceClient {
                    player_id: welcome.player_id,
                    inbound,
                    outbound,
                };
                Ok((client, welcome.game_state))
            }
            ServerMessage::Error(notice) => Err(ClientError::Rejected(notice.message)),
            other => Err(ClientError::UnexpectedMessage(other.kind())),
        }
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub async fn recv(&mut self) -> Result<ServerMessage, CodecError> {
        self.inbound.recv().await
    }

    pub async fn send_control(&mut self, input: ControlInput) -> Result<(), CodecError> {
        self.outbound.send_control(input).await
    }

    pub async fn send_chat(&mut self, text: &str) -> Result<(), CodecError> {
        self.outbound.send_chat(text).await
    }

    pub async fn send_ready(&mut self, ready: bool) -> Result<(), CodecError> {
        self.outbound.send_ready(ready).await
    }

    /// Splits the connection so reading and writing can run in separate tasks.
    pub fn into_split(self) -> (Inbound, Outbound) {
        (self.inbound, self.outbound)
    }
}
