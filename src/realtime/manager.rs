//! Subscription manager and the hub channel task.
//!
//! The manager owns one long-lived hub connection per client. The connection
//! runs in its own task from the moment the manager is started:
//! 1. Opens the WebSocket with the credential as `access_token`
//! 2. Performs the JSON protocol handshake
//! 3. Decodes invocation records into [`ChangeEvent`]s and fans them out to
//!    the listeners registered for that kind
//!
//! A rejected or timed-out handshake is terminal: the state becomes
//! [`ChannelState::Failed`] and no reconnect is attempted. The owner decides
//! what to do via [`SubscriptionManager::wait_connected`].

use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::error::SubscriptionError;
use super::event::{ChangeEvent, ListenerRegistry, ListenerResult};
use super::protocol::{
    handshake_request, ping_record, split_records, EventEnvelope, EventKind, HandshakeResponse,
    HubMessage,
};
use crate::api::Api;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSender = SplitSink<WsStream, Message>;
type WsReceiver = SplitStream<WsStream>;

/// Lifecycle of the hub connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Constructing,
    Connecting,
    Connected,
    /// The handshake was rejected or never completed. Terminal.
    Failed(SubscriptionError),
    /// The connection ended after having been established.
    Closed,
}

/// Owns the hub connection and the listener lists.
pub struct SubscriptionManager {
    registry: Arc<ListenerRegistry>,
    state: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl SubscriptionManager {
    /// Spawns the channel task. Must be called from within a Tokio runtime.
    pub(crate) fn start(api: Arc<Api>) -> Self {
        let registry = Arc::new(ListenerRegistry::default());
        let (state_tx, state_rx) = watch::channel(ChannelState::Constructing);

        let channel = Channel {
            api,
            registry: registry.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(channel.run());

        Self {
            registry,
            state: state_rx,
            task,
        }
    }

    /// Appends `listener` to the list for `kind`.
    ///
    /// Listeners run in registration order. One that returns an error or
    /// panics is logged and does not stop the others.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&ChangeEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.registry.add(kind, Arc::new(listener));
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry.count(kind)
    }

    /// Current state of the hub connection.
    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Resolves once the channel is connected.
    ///
    /// Returns the terminal error if the handshake failed, or
    /// [`SubscriptionError::Closed`] if the connection already ended.
    pub async fn wait_connected(&self) -> Result<(), SubscriptionError> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| !matches!(s, ChannelState::Constructing | ChannelState::Connecting))
            .await
            .map_err(|_| SubscriptionError::Closed("channel task ended".to_string()))?
            .clone();

        match settled {
            ChannelState::Connected => Ok(()),
            ChannelState::Failed(e) => Err(e),
            _ => Err(SubscriptionError::Closed(
                "connection ended before it was awaited".to_string(),
            )),
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// State owned by the channel task.
struct Channel {
    api: Arc<Api>,
    registry: Arc<ListenerRegistry>,
    state: watch::Sender<ChannelState>,
}

impl Channel {
    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    async fn run(self) {
        self.set_state(ChannelState::Connecting);

        let connected = timeout(self.api.config().handshake_timeout, self.connect())
            .await
            .unwrap_or(Err(SubscriptionError::HandshakeTimeout));
        let (sender, receiver, pending) = match connected {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Real-time channel failed to connect: {}", e);
                self.set_state(ChannelState::Failed(e));
                return;
            }
        };

        tracing::info!("Real-time channel connected");
        self.set_state(ChannelState::Connected);

        match self.pump(sender, receiver, pending).await {
            Ok(()) => tracing::info!("Real-time channel closed"),
            Err(e) => tracing::warn!("Real-time channel lost: {}", e),
        }
        self.set_state(ChannelState::Closed);
    }

    /// Opens the socket and performs the handshake. The caller bounds both
    /// steps together with `handshake_timeout`.
    ///
    /// Returns the split stream plus any records that arrived in the same
    /// frame as the handshake answer.
    async fn connect(&self) -> Result<(WsSender, WsReceiver, Vec<String>), SubscriptionError> {
        let config = self.api.config();
        let url = config.hub_connect_url(self.api.credential());

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SubscriptionError::Connection(e.to_string()))?;
        let (mut sender, mut receiver) = ws_stream.split();

        sender
            .send(Message::Text(handshake_request().into()))
            .await
            .map_err(|e| SubscriptionError::WebSocket(e.to_string()))?;

        let pending = Self::await_handshake(&mut receiver).await?;

        Ok((sender, receiver, pending))
    }

    async fn await_handshake(receiver: &mut WsReceiver) -> Result<Vec<String>, SubscriptionError> {
        while let Some(msg_result) = receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    let mut records = split_records(text.as_str());
                    let Some(first) = records.next() else {
                        continue;
                    };

                    let response: HandshakeResponse = serde_json::from_str(first).map_err(|e| {
                        SubscriptionError::Handshake(format!("bad handshake response: {}", e))
                    })?;
                    if let Some(error) = response.error {
                        return Err(SubscriptionError::Handshake(error));
                    }

                    return Ok(records.map(str::to_string).collect());
                }
                Ok(Message::Close(_)) => {
                    return Err(SubscriptionError::Handshake(
                        "Hub closed connection during handshake".to_string(),
                    ));
                }
                Ok(_) => {
                    // Pings are answered by the transport; binary frames are not part of the protocol
                }
                Err(e) => {
                    return Err(SubscriptionError::WebSocket(e.to_string()));
                }
            }
        }
        Err(SubscriptionError::Handshake(
            "Connection closed before handshake completed".to_string(),
        ))
    }

    /// Reads frames until the hub closes the connection.
    async fn pump(
        &self,
        mut sender: WsSender,
        mut receiver: WsReceiver,
        pending: Vec<String>,
    ) -> Result<(), SubscriptionError> {
        for record in &pending {
            if self.handle_record(record)? {
                return Ok(());
            }
        }

        let period = self.api.config().keepalive_interval;
        let mut keepalive =
            (!period.is_zero()).then(|| interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        for record in split_records(text.as_str()) {
                            if self.handle_record(record)? {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        sender
                            .send(Message::Pong(data))
                            .await
                            .map_err(|e| SubscriptionError::WebSocket(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {
                        // Ignore other message types
                    }
                    Some(Err(e)) => return Err(SubscriptionError::WebSocket(e.to_string())),
                },
                _ = next_keepalive(&mut keepalive) => {
                    sender
                        .send(Message::Text(ping_record().into()))
                        .await
                        .map_err(|e| SubscriptionError::WebSocket(e.to_string()))?;
                }
            }
        }
    }

    /// Handles one hub record. Returns `true` when the hub asked to close.
    fn handle_record(&self, record: &str) -> Result<bool, SubscriptionError> {
        let message = match HubMessage::decode(record) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring hub record: {}", e);
                return Ok(false);
            }
        };

        match message {
            HubMessage::Invocation { target, arguments } => {
                self.handle_invocation(&target, arguments);
                Ok(false)
            }
            HubMessage::Close { error: Some(error) } => Err(SubscriptionError::Closed(error)),
            HubMessage::Close { error: None } => Ok(true),
            HubMessage::Ping => Ok(false),
            HubMessage::Other(kind) => {
                tracing::debug!("Ignoring hub record of type {}", kind);
                Ok(false)
            }
        }
    }

    fn handle_invocation(&self, target: &str, arguments: Vec<Value>) {
        let kind: EventKind = match target.parse() {
            Ok(kind) => kind,
            Err(_) => {
                tracing::debug!("Ignoring hub invocation {}", target);
                return;
            }
        };

        let Some(argument) = arguments.into_iter().next() else {
            tracing::warn!("Dropping {} event without payload", kind);
            return;
        };

        let event = EventEnvelope::from_argument(argument)
            .and_then(|envelope| ChangeEvent::decode(&self.api, kind, envelope));

        match event {
            Ok(event) => {
                let failures = self.registry.dispatch(&event);
                tracing::debug!(
                    "Dispatched {} from {} ({} listener failures)",
                    kind,
                    event.meta().database_id,
                    failures
                );
            }
            Err(e) => tracing::warn!("Dropping undecodable {} event: {}", kind, e),
        }
    }
}

impl Drop for Channel {
    // Covers abnormal task exits (abort or panic) so the last published
    // state is never a live one.
    fn drop(&mut self) {
        self.state.send_if_modified(|state| match state {
            ChannelState::Failed(_) | ChannelState::Closed => false,
            _ => {
                *state = ChannelState::Closed;
                true
            }
        });
    }
}

/// Next keepalive tick, or never when keepalive is disabled.
async fn next_keepalive(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
