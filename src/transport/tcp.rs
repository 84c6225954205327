use crate::consts::MAX_FRAME_LEN;
use crate::transport::{FrameTransport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Length-delimited frames over TCP: a big-endian `u32` length, then the frame.
#[derive(Debug)]
pub struct TcpTransport {
    peer: SocketAddr,
    reader: Mutex<FramedRead<OwnedReadHalf, LengthDelimitedCodec>>,
    writer: Mutex<Option<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>>,
}

impl TcpTransport {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            peer,
            reader: Mutex::new(FramedRead::new(read_half, frame_codec())),
            writer: Mutex::new(Some(FramedWrite::new(write_half, frame_codec()))),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl FrameTransport for TcpTransport {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(TransportError::Closed)?;
        writer.send(Bytes::from(frame)).await?;
        Ok(())
    }

    /// `None` only on a clean end of stream at a frame boundary. A connection
    /// that ends inside a length prefix or a frame body is an error.
    async fn receive_frame(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            Some(frame) => Ok(Some(frame?.to_vec())),
            None => Ok(None),
        }
    }

    async fn close(&self, reason: &str) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            tracing::debug!("Closing connection to {}: {}", self.peer, reason);
            if let Err(e) = SinkExt::<Bytes>::close(&mut writer).await {
                tracing::debug!("Shutdown of {} failed: {}", self.peer, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn accepted_pair() -> Result<(TcpStream, TcpTransport), TransportError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let raw = TcpStream::connect(listener.local_addr()?).await?;
        let (stream, _) = listener.accept().await?;
        Ok((raw, TcpTransport::from_stream(stream)?))
    }

    #[tokio::test]
    async fn test_frames_round_trip_over_tcp() -> Result<(), TransportError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await?;
            TcpTransport::from_stream(stream)
        });

        let client = TcpTransport::connect(addr).await?;
        let server = accept
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))??;

        client.send_frame(b"first".to_vec()).await?;
        client.send_frame(Vec::new()).await?;
        assert_eq!(server.receive_frame().await?, Some(b"first".to_vec()));
        assert_eq!(server.receive_frame().await?, Some(Vec::new()));

        client.close("test finished").await;
        assert_eq!(server.receive_frame().await?, None);
        assert!(matches!(
            client.send_frame(vec![1]).await,
            Err(TransportError::Closed)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_wire_format_is_u32_length_prefix() -> Result<(), TransportError> {
        let (mut raw, server) = accepted_pair().await?;
        raw.write_all(&[0, 0, 0, 3, b'a', b'b', b'c']).await?;
        assert_eq!(server.receive_frame().await?, Some(b"abc".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() -> Result<(), TransportError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let client = TcpTransport::connect(listener.local_addr()?).await?;
        let result = client.send_frame(vec![0u8; MAX_FRAME_LEN + 1]).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_incoming_length_is_an_error() -> Result<(), TransportError> {
        let (mut raw, server) = accepted_pair().await?;
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        raw.write_all(&len).await?;
        assert!(server.receive_frame().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_length_prefix_is_an_error() -> Result<(), TransportError> {
        let (mut raw, server) = accepted_pair().await?;
        raw.write_all(&[0, 0]).await?;
        raw.shutdown().await?;
        assert!(matches!(
            server.receive_frame().await,
            Err(TransportError::Io(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_frame_body_is_an_error() -> Result<(), TransportError> {
        let (mut raw, server) = accepted_pair().await?;
        raw.write_all(&[0, 0, 0, 10, 1, 2, 3]).await?;
        raw.shutdown().await?;
        assert!(server.receive_frame().await.is_err());
        Ok(())
    }
}
