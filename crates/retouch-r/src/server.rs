use futures::{SinkExt, StreamExt};
use retouch_common::protocol::{ResponseEnvelope, SelectionMessage};
use retouch_engine::bridge::Bridge;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Text of the `complete` envelope.
pub const COMPLETE_MESSAGE: &str = "Changes applied";

/// Accepts preview-page connections and feeds their selections to the bridge.
pub struct BridgeServer {
    listener: TcpListener,
    bridge: Arc<Bridge>,
}

impl BridgeServer {
    pub async fn bind(addr: impl ToSocketAddrs, bridge: Arc<Bridge>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Bridge server listening on: {}", listener.local_addr()?);
        Ok(Self { listener, bridge })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until the listener fails.
    pub async fn serve(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!("Accepted TCP connection from: {}", peer);
            tokio::spawn(accept_connection(stream, peer, self.bridge.clone()));
        }
    }

    /// Like [`serve`](Self::serve), returning once `shutdown` resolves.
    /// Connections already accepted keep running.
    pub async fn serve_until(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        tokio::select! {
            result = self.serve() => result,
            _ = shutdown => {
                info!("Bridge server shutting down");
                Ok(())
            }
        }
    }
}

async fn accept_connection(stream: TcpStream, peer: SocketAddr, bridge: Arc<Bridge>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Error during the websocket handshake occurred: {}", e);
            return;
        }
    };

    info!(%peer, "New WebSocket connection: established");
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Replies come from per-request tasks; one writer owns the sink.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ResponseEnvelope>();
    tokio::spawn(async move {
        while let Some(envelope) = reply_rx.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    error!(request_id = envelope.id, "Failed to encode envelope: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(json)).await {
                error!("Failed to send message to WS: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<SelectionMessage>(&text) {
                Ok(selection) => {
                    let _ = reply_tx.send(ResponseEnvelope::pending(selection.id));
                    tokio::spawn(run_request(bridge.clone(), selection, reply_tx.clone()));
                }
                Err(e) => {
                    warn!(%peer, error = %e, "Dropping malformed selection message");
                    debug!(%peer, text = %text, "Malformed message body");
                }
            },
            Ok(Message::Close(_)) => {
                info!(%peer, "WebSocket closed");
                break;
            }
            Err(e) => {
                error!(%peer, "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }
}

async fn run_request(
    bridge: Arc<Bridge>,
    selection: SelectionMessage,
    reply_tx: mpsc::UnboundedSender<ResponseEnvelope>,
) {
    let envelope = match bridge.handle_message(&selection).await {
        Ok(_) => ResponseEnvelope::complete(selection.id, COMPLETE_MESSAGE),
        Err(e) => ResponseEnvelope::error(e.request_id, e.stage(), e.code(), e.source.to_string()),
    };
    if reply_tx.send(envelope).is_err() {
        warn!(request_id = selection.id, "Client went away before the result was ready");
    }
}
