//! Response writer.
//!
//! The output stream is owned by one writer task. Every other task holds a
//! cheap [`ResponseWriter`] handle and sends finished [`Frame`]s through an
//! unbounded channel, so frames are written whole and one at a time, and a
//! completing task never waits on the stream.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::protocol::Frame;

/// Handle used by tasks to emit frames.
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    tx: mpsc::UnboundedSender<Frame>,
}

impl ResponseWriter {
    /// Queue `frame` for writing.
    ///
    /// Returns `false` if the writer has stopped; the frame is dropped.
    pub fn send(&self, frame: Frame) -> bool {
        match self.tx.send(frame) {
            Ok(()) => true,
            Err(mpsc::error::SendError(frame)) => {
                debug!(id = %frame.id, tag = %frame.tag, "Writer stopped, dropping frame");
                false
            }
        }
    }
}

/// Spawn the writer task that owns `output`.
///
/// The task exits with `Ok(())` once every [`ResponseWriter`] clone is
/// dropped and the queue is empty. A write or flush failure ends it with the
/// I/O error; the frame being written is lost.
pub fn spawn_writer<W>(output: W) -> (ResponseWriter, JoinHandle<std::io::Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_writer(output, rx));
    (ResponseWriter { tx }, handle)
}

async fn run_writer<W>(mut output: W, mut rx: mpsc::UnboundedReceiver<Frame>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(256);

    while let Some(frame) = rx.recv().await {
        buf.clear();
        frame.encode_into(&mut buf);

        if let Err(e) = write_line(&mut output, &buf).await {
            error!(id = %frame.id, error = %e, "Failed to write response, output closed");
            return Err(e);
        }
        trace!(id = %frame.id, tag = %frame.tag, "Frame written");
    }

    if let Err(e) = output.shutdown().await {
        debug!(error = %e, "Output shutdown failed");
    }
    Ok(())
}

async fn write_line<W>(output: &mut W, line: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(line).await?;
    output.flush().await
}
