use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use dashmap::DashMap;
use futures::stream::SplitStream;
use futures::{SinkExt as _, StreamExt as _, future};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::traits::{Connector, EventSink, MessageHandler, Session, SessionEventKind};
use crate::error::{Error, Kind};
use crate::stomp::{Command, Frame, HEARTBEAT_EOL, HeartBeat, Message, StompError, parse_frames};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens [`StompSession`]s over `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, config: &Config, events: EventSink) -> Result<Arc<dyn Session>> {
        Ok(Arc::new(StompSession::new(config.clone(), events)?))
    }
}

/// STOMP 1.2 session over a WebSocket.
///
/// Once activated the session keeps a transport open until deactivated: when the socket
/// drops it waits for the configured reconnect delay and dials again, reporting every
/// transition through its [`EventSink`]. Subscriptions do not survive a transport drop;
/// the owner re-attaches them after the next [`SessionEventKind::Established`].
pub struct StompSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: Config,
    /// Value of the `host` header in `CONNECT`
    host: String,
    events: EventSink,
    /// Frames queued for the current transport; `None` until `CONNECTED` arrives
    outgoing: RwLock<Option<mpsc::UnboundedSender<Frame>>>,
    /// Handlers keyed by session-level subscription id
    handlers: DashMap<String, MessageHandler>,
    next_receipt: AtomicU64,
    active: AtomicBool,
    cancel: CancellationToken,
}

impl StompSession {
    pub fn new(config: Config, events: EventSink) -> Result<Self> {
        config.validate()?;
        let url = Url::parse(&config.endpoint)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::validation("endpoint must include a host"))?
            .to_owned();

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                host,
                events,
                outgoing: RwLock::new(None),
                handlers: DashMap::new(),
                next_receipt: AtomicU64::new(0),
                active: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        })
    }
}

impl Session for StompSession {
    fn activate(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::validation(
                "session was deactivated and cannot be activated again",
            ));
        }
        if self.inner.active.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run().await;
        });
        Ok(())
    }

    fn deactivate(&self) {
        self.inner.cancel.cancel();
        self.inner.active.store(false, Ordering::Release);
        self.inner.set_outgoing(None);
        self.inner.handlers.clear();
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire) && !self.inner.cancel.is_cancelled()
    }

    fn subscribe(&self, destination: &str, handler: MessageHandler) -> Result<String> {
        if !destination.starts_with('/') {
            return Err(WsError::SubscriptionFailed(format!(
                "destination `{destination}` must start with '/'"
            ))
            .into());
        }

        let guard = self
            .inner
            .outgoing
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(WsError::NotConnected.into());
        };

        let receipt = format!(
            "sub-{}",
            self.inner.next_receipt.fetch_add(1, Ordering::Relaxed)
        );
        self.inner.handlers.insert(receipt.clone(), handler);

        if tx.send(Frame::subscribe(&receipt, destination)).is_err() {
            self.inner.handlers.remove(&receipt);
            return Err(WsError::ConnectionClosed.into());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%receipt, %destination, "STOMP subscription sent");

        Ok(receipt)
    }

    fn unsubscribe(&self, receipt: &str) -> Result<()> {
        if self.inner.handlers.remove(receipt).is_none() {
            return Err(
                WsError::SubscriptionFailed(format!("unknown subscription `{receipt}`")).into(),
            );
        }

        let guard = self
            .inner
            .outgoing
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(WsError::NotConnected.into());
        };
        tx.send(Frame::unsubscribe(receipt))
            .map_err(|_e| WsError::ConnectionClosed)?;

        Ok(())
    }
}

impl Drop for StompSession {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl SessionInner {
    fn set_outgoing(&self, tx: Option<mpsc::UnboundedSender<Frame>>) {
        // The slot holds no invariant beyond "current sender or none", so a poisoned lock is fine.
        *self
            .outgoing
            .write()
            .unwrap_or_else(PoisonError::into_inner) = tx;
    }

    /// Transport loop with automatic low-level reconnect.
    async fn run(self: Arc<Self>) {
        let mut backoff: ExponentialBackoff = self.config.reconnect.clone().into();

        loop {
            let attempt = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = connect_async(self.config.endpoint.as_str()) => result,
            };

            match attempt {
                Ok((ws_stream, _)) => {
                    backoff.reset();
                    let result = self.handle_connection(ws_stream).await;

                    self.set_outgoing(None);
                    self.handlers.clear();
                    if self.cancel.is_cancelled() {
                        break;
                    }

                    match result {
                        Ok(()) => {
                            #[cfg(feature = "tracing")]
                            tracing::info!("STOMP transport closed");
                            self.events.emit(SessionEventKind::Closed);
                        }
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "STOMP transport failed");
                            let kind = if e.kind() == Kind::Protocol {
                                SessionEventKind::ProtocolError(e.to_string())
                            } else {
                                SessionEventKind::TransportError(e.to_string())
                            };
                            self.events.emit(kind);
                        }
                    }
                }
                Err(e) => {
                    let error = Error::from(e);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(endpoint = %self.config.endpoint, "Unable to connect: {error}");
                    self.events
                        .emit(SessionEventKind::TransportError(error.to_string()));
                }
            }

            let Some(delay) = backoff.next_backoff() else {
                break;
            };
            #[cfg(feature = "tracing")]
            tracing::debug!(?delay, "Reconnecting STOMP transport");

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = sleep(delay) => {}
            }
        }

        self.active.store(false, Ordering::Release);
    }

    /// Drive one transport from `CONNECT` until it closes, fails or the session is cancelled.
    ///
    /// Returns `Ok` for a clean close or cancellation.
    async fn handle_connection(&self, ws_stream: WsStream) -> Result<()> {
        let (mut write, mut read) = ws_stream.split();

        let connect = Frame::connect(
            &self.host,
            self.config.heartbeat,
            &self.config.connect_headers,
        );
        write.send(WsMessage::Text(connect.encode().into())).await?;

        let (connected, trailing) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = timeout(self.config.connect_timeout, await_connected(&mut read)) => {
                result.map_err(|_e| WsError::HandshakeTimeout)??
            }
        };

        let server_heartbeat = connected
            .header("heart-beat")
            .map(str::parse::<HeartBeat>)
            .transpose()?
            .unwrap_or(HeartBeat::DISABLED);
        let heartbeat = self.config.heartbeat.negotiate(server_heartbeat);

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.handlers.clear();
        self.set_outgoing(Some(tx));

        #[cfg(feature = "tracing")]
        tracing::info!(
            version = connected.header("version").unwrap_or("1.0"),
            %heartbeat,
            "STOMP session established"
        );
        self.events.emit(SessionEventKind::Established);
        self.dispatch_frames(trailing)?;

        let mut beat = heartbeat_interval(heartbeat.outgoing);
        let mut check = heartbeat_interval(heartbeat.incoming);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    _ = write
                        .send(WsMessage::Text(Frame::disconnect().encode().into()))
                        .await;
                    _ = write.close().await;
                    return Ok(());
                }

                // Handle incoming frames
                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            last_seen = Instant::now();
                            self.dispatch(text.as_str())?;
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            last_seen = Instant::now();
                            let text = std::str::from_utf8(&bytes).map_err(|e| {
                                StompError::Malformed(format!("binary frame is not UTF-8: {e}"))
                            })?;
                            self.dispatch(text)?;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {
                            // Transport level ping/pong still proves liveness.
                            last_seen = Instant::now();
                        }
                        Some(Err(e)) => return Err(e.into()),
                    }
                }

                // Handle outgoing frames from subscribe/unsubscribe
                Some(frame) = rx.recv() => {
                    write.send(WsMessage::Text(frame.encode().into())).await?;
                }

                () = tick(&mut beat) => {
                    write.send(WsMessage::Text(HEARTBEAT_EOL.into())).await?;
                }

                () = tick(&mut check) => {
                    if last_seen.elapsed() > heartbeat.incoming * 2 {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            "Heart-beat timeout: nothing received within {:?}",
                            heartbeat.incoming * 2
                        );
                        return Err(WsError::HeartbeatTimeout.into());
                    }
                }
            }
        }
    }

    /// Route every frame in `text` to its subscription handler.
    fn dispatch(&self, text: &str) -> Result<()> {
        self.dispatch_frames(parse_frames(text)?)
    }

    fn dispatch_frames(&self, frames: Vec<Frame>) -> Result<()> {
        for frame in frames {
            match frame.command {
                Command::Message => {
                    let message = match Message::try_from(frame) {
                        Ok(message) => message,
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "Dropping incomplete MESSAGE frame");
                            #[cfg(not(feature = "tracing"))]
                            let _: &StompError = &e;
                            continue;
                        }
                    };

                    // Clone the handler out so it can unsubscribe without deadlocking the map.
                    let handler = self
                        .handlers
                        .get(&message.subscription)
                        .map(|entry| Arc::clone(entry.value()));
                    match handler {
                        Some(handler) => handler(message),
                        None => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(
                                subscription = %message.subscription,
                                "Dropping message for detached subscription"
                            );
                        }
                    }
                }
                Command::Error => return Err(server_error(frame).into()),
                _other => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(command = %_other, "Ignoring frame");
                }
            }
        }
        Ok(())
    }
}

/// Read until the server answers `CONNECT`.
///
/// Returns the `CONNECTED` frame and whatever followed it in the same WebSocket message.
async fn await_connected(read: &mut SplitStream<WsStream>) -> Result<(Frame, Vec<Frame>)> {
    while let Some(msg) = read.next().await {
        let text = match msg? {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return Err(WsError::ConnectionClosed.into()),
            _ => continue,
        };

        if let Some(handshake) = take_connected(parse_frames(text.as_str())?)? {
            return Ok(handshake);
        }
    }

    Err(WsError::ConnectionClosed.into())
}

/// Find `CONNECTED` in one batch of frames, keeping the frames after it.
fn take_connected(frames: Vec<Frame>) -> Result<Option<(Frame, Vec<Frame>)>> {
    let mut frames = frames.into_iter();
    while let Some(frame) = frames.next() {
        match frame.command {
            Command::Connected => return Ok(Some((frame, frames.collect()))),
            Command::Error => return Err(server_error(frame).into()),
            _other => {
                #[cfg(feature = "tracing")]
                tracing::debug!(command = %_other, "Unexpected frame before CONNECTED");
            }
        }
    }
    Ok(None)
}

fn server_error(frame: Frame) -> StompError {
    StompError::Server {
        message: frame.header("message").map(str::to_owned),
        body: frame.body,
    }
}

fn heartbeat_interval(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending::<()>().await,
    }
}
