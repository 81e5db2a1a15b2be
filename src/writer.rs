//! Per-connection outbound queue and transport writer.
//!
//! Every connection gets one [`TransportWriter`] task owning the writable
//! half of its byte stream and draining a FIFO queue of buffers; any number
//! of cloneable [`WriterHandle`]s feed that queue. The single task is the
//! single active drain per connection, so writes reach the transport in
//! exactly the order they were issued. Closing the connection drops the
//! queue: anything still enqueued is discarded, not delivered.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::{RelayError, Result};

#[derive(Debug)]
struct QueuedWrite {
    buf: Bytes,
    /// Flush the transport after this buffer.
    sync: bool,
}

/// Enqueues buffers for sequential delivery on one connection's transport.
///
/// Handles are cheap to clone and may be held by other connections — this is
/// how the relay delivers a message to a different socket than the one that
/// produced it: the registry hands out the *target* peer's handle and the
/// write goes to the target's transport, never through connection-local
/// state.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<QueuedWrite>,
}

impl WriterHandle {
    /// Enqueues `data` for delivery.
    ///
    /// With a positive `chop_size`, `data` is split into chunks of that many
    /// bytes (the last may be shorter) and each chunk is enqueued marked
    /// synchronous, flushing the transport between chunks — throttled
    /// delivery for exercising a peer's reassembly under small reads.
    /// Otherwise the buffer is enqueued whole, flushed afterwards when
    /// `sync` is set.
    ///
    /// # Errors
    /// [`RelayError::ConnectionClosed`] once the connection's writer task has
    /// stopped.
    pub fn write(&self, data: Bytes, sync: bool, chop_size: Option<usize>) -> Result<()> {
        match chop_size {
            Some(chop) if chop > 0 => {
                let mut offset = 0;
                while offset < data.len() {
                    let end = (offset + chop).min(data.len());
                    self.enqueue(QueuedWrite {
                        buf: data.slice(offset..end),
                        sync: true,
                    })?;
                    offset = end;
                }
                Ok(())
            }
            _ => self.enqueue(QueuedWrite { buf: data, sync }),
        }
    }

    fn enqueue(&self, write: QueuedWrite) -> Result<()> {
        self.tx
            .send(write)
            .map_err(|_| RelayError::ConnectionClosed)
    }
}

/// The drain task for one connection: owns the writable transport half and
/// dequeues buffers sequentially.
pub struct TransportWriter<T> {
    transport: T,
    queue: mpsc::UnboundedReceiver<QueuedWrite>,
}

impl<T: AsyncWrite + Unpin> TransportWriter<T> {
    /// Creates a writer over the given transport together with the handle
    /// that feeds it.
    pub fn new(transport: T) -> (Self, WriterHandle) {
        let (tx, queue) = mpsc::unbounded_channel();
        (Self { transport, queue }, WriterHandle { tx })
    }

    /// Drains the queue until every handle is dropped, then shuts the
    /// transport down.
    ///
    /// A write error stops the drain immediately; buffers still queued are
    /// discarded along with the receiver.
    pub async fn run(mut self) -> std::io::Result<()> {
        while let Some(write) = self.queue.recv().await {
            self.transport.write_all(&write.buf).await?;
            if write.sync {
                self.transport.flush().await?;
            }
        }
        self.transport.shutdown().await
    }
}
