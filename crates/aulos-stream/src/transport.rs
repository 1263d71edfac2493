//! Length-prefixed bincode message transport over Unix sockets.
//!
//! Frames are a `u32` big-endian length followed by the bincode body. This is
//! the control-plane plumbing shared by the session client and the worker
//! link; sample data never travels here.

use crate::error::{Result, StreamError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

/// Upper bound on one control frame; anything larger is a protocol error.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

async fn send_frame<M, W>(writer: &mut W, message: &M) -> Result<()>
where
    M: Serialize,
    W: AsyncWrite + Unpin,
{
    let data = bincode::serialize(message)?;
    writer.write_u32(data.len() as u32).await?;
    writer.write_all(&data).await?;
    Ok(())
}

async fn recv_frame<M, R>(reader: &mut R) -> Result<M>
where
    M: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(StreamError::Protocol(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(bincode::deserialize(&data)?)
}

/// Message transport for control-plane IPC.
pub struct MessageTransport {
    stream: UnixStream,
}

impl MessageTransport {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self { stream })
    }

    pub async fn send<M: Serialize>(&mut self, message: &M) -> Result<()> {
        send_frame(&mut self.stream, message).await
    }

    pub async fn recv<M: DeserializeOwned>(&mut self) -> Result<M> {
        recv_frame(&mut self.stream).await
    }

    /// Split into independently-owned halves, for loops that select between
    /// sending and receiving.
    pub fn into_split(self) -> (MessageSender, MessageReceiver) {
        let (read, write) = self.stream.into_split();
        (MessageSender { write }, MessageReceiver { read })
    }
}

/// Write half of a split [`MessageTransport`].
pub struct MessageSender {
    write: OwnedWriteHalf,
}

impl MessageSender {
    pub async fn send<M: Serialize>(&mut self, message: &M) -> Result<()> {
        send_frame(&mut self.write, message).await
    }
}

/// Read half of a split [`MessageTransport`].
pub struct MessageReceiver {
    read: OwnedReadHalf,
}

impl MessageReceiver {
    pub async fn recv<M: DeserializeOwned>(&mut self) -> Result<M> {
        recv_frame(&mut self.read).await
    }
}

/// Server-side transport listener.
pub struct TransportListener {
    listener: UnixListener,
}

impl TransportListener {
    /// Bind to a socket path, replacing any stale socket file.
    pub async fn bind(socket_path: &Path) -> Result<Self> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> Result<MessageTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(MessageTransport::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HostMessage, WorkerMessage};

    #[tokio::test]
    async fn test_send_recv_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "aulos_test_transport_{}.sock",
            std::process::id()
        ));
        let listener = TransportListener::bind(&path).await.unwrap();

        let server = tokio::spawn(async move {
            let mut transport = listener.accept().await.unwrap();
            transport.send(&WorkerMessage::Ready).await.unwrap();
            transport.recv::<HostMessage>().await.unwrap()
        });

        let mut client = MessageTransport::connect(&path).await.unwrap();
        assert!(matches!(
            client.recv::<WorkerMessage>().await.unwrap(),
            WorkerMessage::Ready
        ));
        client.send(&HostMessage::Shutdown).await.unwrap();

        assert!(matches!(server.await.unwrap(), HostMessage::Shutdown));
        let _ = std::fs::remove_file(&path);
    }
}
