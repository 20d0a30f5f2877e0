//! Length-prefixed frames over any async byte stream.
//!
//! Each frame is written as a 4-byte little-endian length followed by the
//! frame bytes. Works the same over Unix sockets, TCP, or `tokio::io::duplex`.

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::sync::Mutex;

use super::Error;
use super::Result;
use super::Transport;

/// Frames larger than this are refused unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub struct StreamTransport<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    max_frame_len: usize,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Sets the largest frame accepted in either direction.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    fn check_len(&self, len: usize) -> Result<u32> {
        if len > self.max_frame_len {
            return Err(Error::FrameTooLarge { len, max: self.max_frame_len });
        }
        u32::try_from(len).map_err(|_| Error::FrameTooLarge { len, max: u32::MAX as usize })
    }
}

#[async_trait::async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let len = self.check_len(frame.len())?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&len.to_le_bytes()).await?;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;

        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = reader.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::ConnectionLost(format!(
                    "eof after {} of 4 length bytes",
                    filled
                )));
            }
            filled += n;
        }

        let len = u32::from_le_bytes(header) as usize;
        self.check_len(len)?;
        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;
        Ok(Some(frame))
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "stream shutdown failed");
        }
    }
}
