//! Per-socket machinery shared by both transports.

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_protocol::{encode, FrameDecoder, FramingError, RpcMessage, LENGTH_PREFIX_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Write side of one socket plus the token that ends its tasks.
///
/// A dedicated writer task owns the socket's write half and writes queued
/// frames whole, in order. Dropping a `send` future never leaves a partial
/// frame on the wire.
#[derive(Clone)]
pub(crate) struct Connection {
    id: u64,
    frames: mpsc::UnboundedSender<Outgoing>,
    max_frame_len: usize,
    cancel: CancellationToken,
    // Cancelled by the writer task once the socket is shut down.
    flushed: CancellationToken,
}

struct Outgoing {
    frame: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

impl Connection {
    pub(crate) fn new(writer: OwnedWriteHalf, max_frame_len: usize) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (frames, queue) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let flushed = CancellationToken::new();
        tokio::spawn(run_writer(id, writer, queue, cancel.clone(), flushed.clone()));
        Self {
            id,
            frames,
            max_frame_len,
            cancel,
            flushed,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queue one frame and wait until it is written.
    ///
    /// Frames larger than `max_frame_len` are refused without touching the
    /// socket. Fails with `SocketOffline` once the connection closes.
    pub(crate) async fn send(&self, message: &RpcMessage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::SocketOffline);
        }
        let frame = encode(message)?;
        let body_len = frame.len() - LENGTH_PREFIX_LEN;
        if body_len > self.max_frame_len {
            return Err(TransportError::Framing(FramingError::FrameTooLarge {
                len: body_len,
                max: self.max_frame_len,
            }));
        }

        let (done, written) = oneshot::channel();
        self.frames
            .send(Outgoing { frame, done })
            .map_err(|_| TransportError::SocketOffline)?;
        written.await.unwrap_or(Err(TransportError::SocketOffline))
    }

    /// Stop the connection's tasks and wait for the socket to shut down.
    pub(crate) async fn close(&self) {
        self.cancel.cancel();
        self.flushed.cancelled().await;
    }
}

async fn run_writer(
    id: u64,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    cancel: CancellationToken,
    flushed: CancellationToken,
) {
    let _flushed = flushed.drop_guard();
    loop {
        let outgoing = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outgoing = queue.recv() => match outgoing {
                Some(outgoing) => outgoing,
                None => break,
            },
        };
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::SocketOffline),
            written = writer.write_all(&outgoing.frame) => written.map_err(TransportError::Io),
        };
        let failed = written.is_err();
        // The sender may have stopped waiting.
        let _ = outgoing.done.send(written);
        if failed {
            break;
        }
    }
    // Queued frames are dropped here; their senders observe `SocketOffline`.
    queue.close();
    if let Err(e) = writer.shutdown().await {
        trace!(connection = id, error = %e, "socket shutdown failed");
    }
}

/// Where decoded frames go.
#[async_trait]
pub(crate) trait Inbound: Send + Sync + 'static {
    async fn deliver(&self, message: RpcMessage);
}

/// Read frames until EOF, cancellation, or failure.
///
/// Responses are delivered inline; requests are queued to a dispatch task
/// that delivers them one at a time. Returns `Ok(())` on EOF or
/// cancellation. The caller must cancel the connection afterwards.
pub(crate) async fn run_reader(
    mut reader: OwnedReadHalf,
    config: &TransportConfig,
    cancel: CancellationToken,
    inbound: Arc<dyn Inbound>,
) -> Result<()> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let dispatch = spawn_request_dispatch(request_rx, cancel.clone(), inbound.clone());

    let mut decoder = FrameDecoder::with_max_frame_len(config.max_frame_len);
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    let dead_after = config.dead_peer_timeout();

    let result = loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            read = read_some(&mut reader, &mut buf, dead_after) => read,
        };
        let n = match read {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };

        decoder.extend(&buf[..n]);
        let mut failure = None;
        loop {
            match decoder.next_message() {
                Ok(Some(RpcMessage::KeepAlive)) => trace!("keep-alive received"),
                Ok(Some(message @ RpcMessage::Response(_))) => inbound.deliver(message).await,
                Ok(Some(message)) => {
                    if request_tx.send(message).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    failure = Some(TransportError::Framing(e));
                    break;
                }
            }
        }
        if let Some(e) = failure {
            break Err(e);
        }
    };

    // The dispatch task ends when the owner cancels the connection; an
    // in-flight request finishes and its response observes `SocketOffline`.
    drop(dispatch);
    result
}

async fn read_some(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    dead_after: Option<Duration>,
) -> Result<usize> {
    match dead_after {
        Some(limit) => match tokio::time::timeout(limit, reader.read(buf)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(TransportError::PeerTimedOut(limit)),
        },
        None => Ok(reader.read(buf).await?),
    }
}

fn spawn_request_dispatch(
    mut requests: mpsc::UnboundedReceiver<RpcMessage>,
    cancel: CancellationToken,
    inbound: Arc<dyn Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = requests.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            inbound.deliver(message).await;
        }
    })
}

/// Send a keep-alive frame every `interval` until the connection closes.
pub(crate) fn spawn_keep_alive(connection: Connection, interval: Option<Duration>) {
    let Some(interval) = interval else {
        return;
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = connection.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = connection.send(&RpcMessage::KeepAlive).await {
                        debug!(connection = connection.id, error = %e, "keep-alive stopped");
                        break;
                    }
                }
            }
        }
    });
}
