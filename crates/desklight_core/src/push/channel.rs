//! Long-lived STOMP subscription with reconnect.
//!
//! # Responsibility
//! - Drive `Disconnected -> Connecting -> Subscribed` and publish each state.
//! - Forward decoded events to the runtime; drop malformed payloads.
//!
//! # Invariants
//! - At most one session is open per channel at any time.
//! - `PushHandle::close` is idempotent and valid in every state.
//! - A decode failure never ends the session.

use super::reconnect::ReconnectPolicy;
use super::stomp::{parse_frames, Command, Frame};
use super::{decode_push_payload, ChannelState, PushError, PushEvent};
use crate::config::ClientConfig;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Text-message transport underneath the STOMP session.
#[async_trait]
pub trait FrameTransport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), PushError>;

    /// Next text message, or `None` once the remote side closed.
    async fn recv_text(&mut self) -> Option<Result<String, PushError>>;
}

/// Opens transports to the push endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: FrameTransport + 'static;

    async fn connect(&self, url: &str) -> Result<Self::Transport, PushError>;
}

/// WebSocket transport.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), PushError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|err| PushError::Socket(err.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, PushError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(PushError::Socket(err.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => {
                    return Some(String::from_utf8(bytes).map_err(|err| {
                        PushError::Protocol(format!("binary frame is not UTF-8: {err}"))
                    }));
                }
                Message::Close(_) => return None,
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

/// Connector for `ws://` and `wss://` endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, PushError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|err| PushError::Socket(err.to_string()))?;
        Ok(WsTransport { stream })
    }
}

/// Time allowed from opening the socket until the broker sends CONNECTED.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoint, topic and reconnect behavior for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSettings {
    pub url: String,
    pub topic: String,
    pub reconnect: ReconnectPolicy,
    /// Bounds connect plus handshake; expiry counts as a lost session.
    pub handshake_timeout: Duration,
}

impl PushSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            url: config.ws_url.clone(),
            topic: config.topic.clone(),
            reconnect: config.reconnect.clone(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Owner-side handle of a running channel.
pub struct PushHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ChannelState>,
    task: Option<JoinHandle<()>>,
}

impl PushHandle {
    /// Tears the subscription down. Safe to call repeatedly.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits until the channel task has stopped.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("event=push_join module=push status=error error={err}");
            }
        }
    }
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Push subscription driver.
pub struct PushChannel<C: Connector = WsConnector> {
    connector: C,
    settings: PushSettings,
    state: watch::Sender<ChannelState>,
    events: mpsc::Sender<PushEvent>,
    cancel: CancellationToken,
}

enum SessionEnd {
    Cancelled,
    ReceiverClosed,
    Lost { error: PushError, subscribed: bool },
}

impl<C: Connector> PushChannel<C> {
    /// Starts the channel on the current tokio runtime.
    ///
    /// Decoded events are sent to `events`; the channel stops when that
    /// receiver is dropped, when the handle is closed, or when the reconnect
    /// policy gives up.
    pub fn spawn(
        connector: C,
        settings: PushSettings,
        events: mpsc::Sender<PushEvent>,
    ) -> PushHandle {
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let cancel = CancellationToken::new();
        let channel = Self {
            connector,
            settings,
            state: state_tx,
            events,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(channel.run());
        PushHandle {
            cancel,
            state: state_rx,
            task: Some(task),
        }
    }

    async fn run(self) {
        let host = endpoint_host(&self.settings.url);
        let mut backoff = self.settings.reconnect.backoff();

        loop {
            self.set_state(ChannelState::Connecting);
            match self.session(&host).await {
                SessionEnd::Cancelled => break,
                SessionEnd::ReceiverClosed => {
                    debug!("event=push_stop module=push reason=receiver_closed");
                    break;
                }
                SessionEnd::Lost { error, subscribed } => {
                    if subscribed {
                        backoff.reset();
                    }
                    warn!(
                        "event=push_session_lost module=push status=error url={} error={error}",
                        self.settings.url
                    );
                }
            }

            self.set_state(ChannelState::Disconnected);
            let Some(delay) = backoff.next_delay() else {
                info!(
                    "event=push_stop module=push reason=reconnect_exhausted attempts={}",
                    backoff.attempts()
                );
                break;
            };
            debug!(
                "event=push_reconnect_wait module=push delay_ms={} attempt={}",
                delay.as_millis(),
                backoff.attempts()
            );
            let cancelled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                break;
            }
        }

        self.set_state(ChannelState::Disconnected);
    }

    async fn session(&self, host: &str) -> SessionEnd {
        let subscription_id = format!("sub-{}", Uuid::new_v4().simple());
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            opened = self.open(host, &subscription_id) => Some(opened),
        };
        let mut transport = match opened {
            None => return SessionEnd::Cancelled,
            Some(Ok(transport)) => transport,
            Some(Err(error)) => {
                return SessionEnd::Lost {
                    error,
                    subscribed: false,
                }
            }
        };

        self.set_state(ChannelState::Subscribed);
        info!(
            "event=push_subscribed module=push status=ok url={} topic={}",
            self.settings.url, self.settings.topic
        );
        pump(&mut transport, &subscription_id, &self.events, &self.cancel).await
    }

    async fn open(&self, host: &str, subscription_id: &str) -> Result<C::Transport, PushError> {
        let attempt = async {
            let mut transport = self.connector.connect(&self.settings.url).await?;
            handshake(&mut transport, host, &self.settings.topic, subscription_id).await?;
            Ok(transport)
        };
        let limit = self.settings.handshake_timeout;
        match tokio::time::timeout(limit, attempt).await {
            Ok(opened) => opened,
            Err(_) => Err(PushError::Handshake(format!(
                "no CONNECTED frame within {}ms",
                limit.as_millis()
            ))),
        }
    }

    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Sends CONNECT, waits for CONNECTED and subscribes to `topic`.
async fn handshake<T: FrameTransport>(
    transport: &mut T,
    host: &str,
    topic: &str,
    subscription_id: &str,
) -> Result<(), PushError> {
    transport.send_text(Frame::connect(host).encode()).await?;
    loop {
        let text = match transport.recv_text().await {
            Some(received) => received?,
            None => return Err(PushError::Closed),
        };
        for frame in parse_frames(&text)? {
            match frame.command {
                Command::Connected => {
                    let subscribe = Frame::subscribe(subscription_id, topic);
                    transport.send_text(subscribe.encode()).await?;
                    return Ok(());
                }
                Command::Error => return Err(PushError::Handshake(error_summary(&frame))),
                other => debug!(
                    "event=push_frame_ignored module=push phase=handshake command={}",
                    other.as_str()
                ),
            }
        }
    }
}

async fn pump<T: FrameTransport>(
    transport: &mut T,
    subscription_id: &str,
    events: &mpsc::Sender<PushEvent>,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            received = transport.recv_text() => Some(received),
        };
        let text = match received {
            None => {
                if let Err(err) = transport.send_text(Frame::disconnect().encode()).await {
                    debug!("event=push_disconnect module=push status=error error={err}");
                }
                return SessionEnd::Cancelled;
            }
            Some(Some(Ok(text))) => text,
            Some(Some(Err(error))) => {
                return SessionEnd::Lost {
                    error,
                    subscribed: true,
                }
            }
            Some(None) => {
                return SessionEnd::Lost {
                    error: PushError::Closed,
                    subscribed: true,
                }
            }
        };

        let frames = match parse_frames(&text) {
            Ok(frames) => frames,
            Err(err) => {
                warn!("event=push_frame_dropped module=push status=error error={err}");
                continue;
            }
        };

        for frame in frames {
            match frame.command {
                Command::Message => {
                    if frame
                        .get("subscription")
                        .is_some_and(|id| id != subscription_id)
                    {
                        debug!("event=push_frame_ignored module=push reason=foreign_subscription");
                        continue;
                    }
                    match decode_push_payload(&frame.body) {
                        Ok(event) => {
                            debug!(
                                "event=push_event module=push task_id={}",
                                event.task_id()
                            );
                            if events.send(event).await.is_err() {
                                return SessionEnd::ReceiverClosed;
                            }
                        }
                        Err(err) => {
                            warn!("event=push_decode module=push status=error error={err}");
                        }
                    }
                }
                Command::Error => {
                    return SessionEnd::Lost {
                        error: PushError::Protocol(error_summary(&frame)),
                        subscribed: true,
                    };
                }
                other => debug!(
                    "event=push_frame_ignored module=push phase=subscribed command={}",
                    other.as_str()
                ),
            }
        }
    }
}

fn error_summary(frame: &Frame) -> String {
    let message = frame.get("message").unwrap_or("broker error");
    let body = frame.body.trim();
    if body.is_empty() {
        message.to_string()
    } else {
        format!("{message}: {body}")
    }
}

fn endpoint_host(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::{endpoint_host, error_summary};
    use crate::push::stomp::{Command, Frame};

    #[test]
    fn endpoint_host_extracts_hostname() {
        assert_eq!(endpoint_host("ws://tasks.example.com:8080/ws"), "tasks.example.com");
        assert_eq!(endpoint_host("not a url"), "localhost");
    }

    #[test]
    fn error_summary_joins_message_and_body() {
        let mut frame = Frame::new(Command::Error).header("message", "access denied");
        assert_eq!(error_summary(&frame), "access denied");
        frame.body = "topic is private".to_string();
        assert_eq!(error_summary(&frame), "access denied: topic is private");
    }
}
