//! Stream transport
//!
//! A transport owns one server-initiated event channel and reports it as a
//! sequence of signals: `Opened` fires on the initial connect and on every
//! low-level auto-reconnect, `Frame` carries one raw serialized event, and
//! `Failed` distinguishes transient errors (the transport is still retrying)
//! from a fully closed channel. Reconnect policy above that level belongs to
//! the supervisor.

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::TransportError;

/// Delay before the transport's single internal retry after a mid-stream
/// drop. Anything beyond that escalates to the supervisor's backoff.
const INTERNAL_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Signal buffer; the supervisor drains promptly, this only absorbs bursts.
const SIGNAL_BUFFER: usize = 256;

/// One transport-level observation.
#[derive(Debug)]
pub enum TransportSignal {
    /// Channel (re)established.
    Opened,
    /// One raw event frame, still serialized.
    Frame(String),
    /// Transport failure. When `closed` is false the transport is retrying
    /// on its own and will emit `Opened` again on success; when true it has
    /// given up and emits nothing further.
    Failed { closed: bool, reason: String },
}

/// A live channel handed out by [`StreamTransport::open`]. Dropping it
/// tears down the underlying connection.
pub struct TransportConn {
    signals: mpsc::Receiver<TransportSignal>,
    abort: Option<AbortHandle>,
}

impl TransportConn {
    /// Build a connection from a raw signal receiver. Used by scripted
    /// transports in tests; real transports attach an abort handle.
    pub fn new(signals: mpsc::Receiver<TransportSignal>) -> Self {
        Self {
            signals,
            abort: None,
        }
    }

    pub fn with_abort(signals: mpsc::Receiver<TransportSignal>, abort: AbortHandle) -> Self {
        Self {
            signals,
            abort: Some(abort),
        }
    }

    /// Next signal, or `None` once the transport task has exited.
    pub async fn recv(&mut self) -> Option<TransportSignal> {
        self.signals.recv().await
    }
}

impl Drop for TransportConn {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

/// Factory for event channels. The supervisor holds exactly one open
/// connection at a time.
pub trait StreamTransport: Send + Sync + 'static {
    fn open(&self) -> impl Future<Output = Result<TransportConn, TransportError>> + Send;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport against the gateway's event endpoint. The
/// subscription carries no session filter — demultiplexing happens in the
/// dispatcher, so a change of "current session" never forces a reconnect.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl StreamTransport for WsTransport {
    async fn open(&self) -> Result<TransportConn, TransportError> {
        let (ws, _) = connect_async(self.url.clone())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let handle = tokio::spawn(pump(self.url.clone(), ws, signal_tx));
        Ok(TransportConn::with_abort(signal_rx, handle.abort_handle()))
    }
}

/// Read frames off the socket and forward them as signals. A mid-stream
/// drop gets one internal retry; a failed reconnect closes the transport.
async fn pump(url: String, mut ws: WsStream, tx: mpsc::Sender<TransportSignal>) {
    if tx.send(TransportSignal::Opened).await.is_err() {
        return;
    }
    loop {
        let reason = read_until_drop(&mut ws, &tx).await;
        let Some(reason) = reason else {
            // Receiver side went away; the connection was torn down.
            return;
        };
        debug!(component = "transport", reason = %reason, "stream dropped, retrying");
        if tx
            .send(TransportSignal::Failed {
                closed: false,
                reason: reason.clone(),
            })
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(INTERNAL_RETRY_DELAY).await;
        match connect_async(url.clone()).await {
            Ok((next, _)) => {
                ws = next;
                if tx.send(TransportSignal::Opened).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = tx
                    .send(TransportSignal::Failed {
                        closed: true,
                        reason: err.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}

/// Forward text frames until the socket drops. Returns the drop reason, or
/// `None` when the signal receiver has been dropped.
async fn read_until_drop(ws: &mut WsStream, tx: &mpsc::Sender<TransportSignal>) -> Option<String> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if tx
                    .send(TransportSignal::Frame(text.to_string()))
                    .await
                    .is_err()
                {
                    return None;
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                return Some("closed by peer".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                return Some(err.to_string());
            }
        }
    }
}
