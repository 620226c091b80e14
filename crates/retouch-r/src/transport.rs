//! Client side of the bridge WebSocket: request ids, response routing and
//! reconnection.
//!
//! One supervisor task owns the socket. It connects, pumps frames until the
//! connection drops, fails whatever was still pending, then retries with
//! doubling delays until the attempt budget runs out.

use futures::{SinkExt, StreamExt};
use retouch_common::error::TransportError;
use retouch_common::protocol::{ResponseEnvelope, SelectionMessage};
use retouch_engine::config::schema::TransportConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::pending::{PendingRequests, ResponseEvent, ResponseHandler};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    /// Reconnect attempts after a loss before giving up for good.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted. Permanent.
    Disconnected,
    /// Torn down by `close` or drop.
    Closed,
}

enum ConnectionEnd {
    Lost,
    Shutdown,
}

struct Inner {
    url: String,
    policy: ReconnectPolicy,
    pending: Mutex<PendingRequests>,
    next_id: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    state_tx: watch::Sender<ConnectionState>,
}

pub struct CorrelatedTransport {
    inner: Arc<Inner>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    _supervisor: JoinHandle<()>,
}

impl CorrelatedTransport {
    /// Starts connecting to `url` in the background. Use
    /// [`wait_connected`](Self::wait_connected) to wait for the socket.
    pub fn connect(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            url: url.into(),
            policy,
            pending: Mutex::new(PendingRequests::new()),
            next_id: AtomicU64::new(1),
            outbound: Mutex::new(None),
            state_tx,
        });

        let supervisor = tokio::spawn(supervise(inner.clone(), shutdown_rx));

        Self {
            inner,
            state_rx,
            shutdown_tx,
            _supervisor: supervisor,
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Resolves once connected, or with an error once the transport can no
    /// longer connect.
    pub async fn wait_connected(&self) -> Result<(), TransportError> {
        let mut rx = self.state_rx.clone();
        let state = match rx
            .wait_for(|s| {
                matches!(
                    s,
                    ConnectionState::Connected
                        | ConnectionState::Disconnected
                        | ConnectionState::Closed
                )
            })
            .await
        {
            Ok(state) => *state,
            Err(_) => return Err(TransportError::Closed),
        };

        match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => Err(TransportError::Disconnected {
                attempts: self.inner.policy.max_attempts,
            }),
            _ => Err(TransportError::Closed),
        }
    }

    /// Assigns a fresh id to `msg`, registers `handler` under it and queues the
    /// message. Returns the id.
    pub async fn send(
        &self,
        mut msg: SelectionMessage,
        handler: Option<ResponseHandler>,
    ) -> Result<u64, TransportError> {
        let outbound = self
            .inner
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        msg.id = id;
        let json = serde_json::to_string(&msg)?;

        if let Some(handler) = handler {
            self.inner.pending.lock().await.register(id, handler);
        }

        if outbound.send(json).is_err() {
            // Writer is gone; its connection is already being torn down.
            self.inner.pending.lock().await.remove(id);
            return Err(TransportError::ConnectionLost);
        }

        debug!(request_id = id, "Queued selection message");
        Ok(id)
    }

    /// Sends `msg` and waits for its terminal envelope.
    ///
    /// An `error` envelope is a valid answer and comes back as `Ok`.
    pub async fn request(&self, msg: SelectionMessage) -> Result<ResponseEnvelope, TransportError> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        let handler: ResponseHandler = Box::new(move |event: ResponseEvent| {
            let outcome = match event {
                ResponseEvent::Update(envelope) if !envelope.status.is_terminal() => return,
                ResponseEvent::Update(envelope) => Ok(envelope),
                ResponseEvent::Failed(err) => Err(err),
            };
            if let Some(tx) = tx.take() {
                let _ = tx.send(outcome);
            }
        });

        self.send(msg, Some(handler)).await?;
        rx.await.unwrap_or(Err(TransportError::Closed))
    }

    /// Routes one raw inbound frame. Malformed frames and unknown ids are
    /// logged and reported, never panicked on.
    pub async fn on_receive(&self, raw: &str) -> Result<(), TransportError> {
        self.inner.on_receive(raw).await
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Tears the connection down. Pending requests fail with
    /// `TransportError::Closed`.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
        info!(url = %self.inner.url, "Transport closed");
    }
}

impl Drop for CorrelatedTransport {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    async fn on_receive(&self, raw: &str) -> Result<(), TransportError> {
        let envelope: ResponseEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed envelope");
                return Err(TransportError::MalformedEnvelope(e.to_string()));
            }
        };

        let id = envelope.id;
        let status = envelope.status;
        match self.pending.lock().await.dispatch(envelope) {
            Ok(()) => {
                debug!(request_id = id, ?status, "Delivered response");
                Ok(())
            }
            Err(e) => {
                warn!(request_id = id, ?status, "No handler for response, dropping");
                Err(e)
            }
        }
    }

    async fn fail_pending(&self, err: TransportError) {
        let failed = self.pending.lock().await.fail_all(err.clone());
        if failed > 0 {
            warn!(failed, error = %err, "Failed pending requests");
        }
    }

    async fn run_connection(
        &self,
        socket: Socket,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionEnd {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock().await = Some(tx);
        self.set_state(ConnectionState::Connected);

        let end = loop {
            tokio::select! {
                Some(text) = rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(error = %e, "WebSocket write failed");
                        break ConnectionEnd::Lost;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = self.on_receive(&text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed by peer");
                        break ConnectionEnd::Lost;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read failed");
                        break ConnectionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                },
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break ConnectionEnd::Shutdown;
                }
            }
        };

        // Dropping the receiver discards anything still queued, and makes any
        // later `send` on this connection fail instead of leaking its handler.
        *self.outbound.lock().await = None;
        drop(rx);
        end
    }
}

async fn supervise(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            result = connect_async(inner.url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((socket, _)) => {
                info!(url = %inner.url, "Transport connected");
                attempt = 0;
                match inner.run_connection(socket, &mut shutdown).await {
                    ConnectionEnd::Shutdown => break,
                    ConnectionEnd::Lost => {
                        inner.fail_pending(TransportError::ConnectionLost).await;
                    }
                }
            }
            Err(e) => {
                warn!(url = %inner.url, attempt, error = %e, "Connection attempt failed");
            }
        }

        attempt += 1;
        if attempt > inner.policy.max_attempts {
            warn!(
                url = %inner.url,
                attempts = inner.policy.max_attempts,
                "Giving up on reconnecting"
            );
            inner.set_state(ConnectionState::Disconnected);
            // Stay parked so `close` still observes the final transition.
            let _ = shutdown.wait_for(|stop| *stop).await;
            break;
        }

        let delay = inner.policy.delay_for(attempt);
        info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
        inner.set_state(ConnectionState::Reconnecting { attempt });
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    inner.fail_pending(TransportError::Closed).await;
    inner.set_state(ConnectionState::Closed);
}
