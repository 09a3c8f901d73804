use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::state::{ConnectionState, Transition};
use super::subscription::{Attachment, SubscriptionManager};
use super::types::{
    Channel, ConnectOutcome, ConnectionCheck, ConnectionStatus, RestoreReport, SubscriptionHandle,
    SubscriptionInfo,
};
use crate::Result;
use crate::error::Error;
use crate::identity::{IdentityProvider, UserId};
use crate::stomp::Message;
use crate::ws::config::Config;
use crate::ws::{
    Connector, EventSink, MessageHandler, Session, SessionEvent, SessionEventKind, WsConnector,
};

/// Shared real-time connection: one STOMP session, many id-keyed subscriptions.
///
/// Cloning is cheap and every clone drives the same session, so one client is built at
/// start-up and handed to each consumer.
///
/// # Examples
///
/// ```rust, no_run
/// use std::sync::Arc;
///
/// use stomp_link::identity::{CurrentMember, MemberStore};
/// use stomp_link::ws::config::Config;
/// use stomp_link::Client;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let members = Arc::new(MemberStore::new());
///     members.set_current_member(CurrentMember::new(7, "runner"));
///
///     let client = Client::new(Config::default(), members)?;
///     client.connect();
///
///     let handle = client
///         .subscribe_notifications(|message| println!("{}", message.body))
///         .await;
///     println!("attached: {handle:?}");
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ActiveSession {
    generation: u64,
    /// Establishment count of this session; 0 until the first `CONNECTED`
    epoch: u64,
    session: Arc<dyn Session>,
}

impl ActiveSession {
    fn attachment(&self) -> Attachment<'_> {
        Attachment {
            session: self.session.as_ref(),
            generation: self.generation,
            epoch: self.epoch,
        }
    }
}

struct ClientInner {
    config: Config,
    identity: Arc<dyn IdentityProvider>,
    connector: Arc<dyn Connector>,
    /// Watch channel sender for state changes
    state_tx: watch::Sender<ConnectionState>,
    /// The one session slot; replaced wholesale, never mutated in place
    session: RwLock<Option<ActiveSession>>,
    /// Consecutive `connect` attempts since the last success or reset
    attempts: AtomicU32,
    generation: AtomicU64,
    epoch: AtomicU64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    subscriptions: SubscriptionManager,
    /// Cancels scheduled work (waiting subscribes, forced reconnects) on `disconnect`
    tasks: Mutex<CancellationToken>,
}

impl Client {
    /// Create a client speaking STOMP over `tokio-tungstenite`.
    ///
    /// Must be called within a Tokio runtime. Nothing connects until [`Client::connect`].
    pub fn new(config: Config, identity: Arc<dyn IdentityProvider>) -> Result<Self> {
        Self::with_connector(config, identity, Arc::new(WsConnector))
    }

    /// Create a client whose sessions come from `connector`.
    pub fn with_connector(
        config: Config,
        identity: Arc<dyn IdentityProvider>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;

        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            config,
            identity,
            connector,
            state_tx,
            session: RwLock::new(None),
            attempts: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            events_tx,
            subscriptions: SubscriptionManager::new(),
            tasks: Mutex::new(CancellationToken::new()),
        });

        tokio::spawn(run_event_loop(Arc::downgrade(&inner), events_rx));

        Ok(Self { inner })
    }

    /// Activate a new session if the identity allows it and nothing is connected yet.
    ///
    /// Never blocks on the network: the outcome of the handshake arrives later and
    /// shows up in [`Client::connection_state`].
    pub fn connect(&self) -> ConnectOutcome {
        let Some(user_id) = self.current_user_id() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("Not connecting: no authenticated user");
            return ConnectOutcome::NotAuthenticated;
        };

        let mut slot = self.inner.write_session();
        let state = self.connection_state();
        if slot.is_some() && state.is_connected() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Already connected");
            return ConnectOutcome::AlreadyConnected;
        }
        if state.is_connecting() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Connect already in progress");
            return ConnectOutcome::InProgress;
        }

        let max = self.inner.config.max_connect_attempts;
        let attempts = self.inner.attempts.load(Ordering::Acquire);
        if attempts >= max {
            #[cfg(feature = "tracing")]
            tracing::error!(attempts, max, "Connect attempts exhausted; force_reconnect required");
            return ConnectOutcome::AttemptsExhausted;
        }

        let attempt = attempts + 1;
        self.inner.attempts.store(attempt, Ordering::Release);
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.transition(Transition::Started { attempt });

        #[cfg(feature = "tracing")]
        tracing::info!(
            attempt,
            max,
            %user_id,
            endpoint = %self.inner.config.endpoint,
            "Connecting"
        );
        #[cfg(not(feature = "tracing"))]
        let _: &UserId = &user_id;

        let sink = EventSink::new(generation, self.inner.events_tx.clone());
        let session = match self.inner.connector.connect(&self.inner.config, sink) {
            Ok(session) => session,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Unable to create session");
                #[cfg(not(feature = "tracing"))]
                let _: &Error = &e;
                self.inner.transition(Transition::Lost);
                return ConnectOutcome::Failed;
            }
        };

        let previous = slot.replace(ActiveSession {
            generation,
            epoch: 0,
            session: Arc::clone(&session),
        });
        if let Some(previous) = previous {
            previous.session.deactivate();
        }

        if let Err(e) = session.activate() {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Unable to activate session");
            #[cfg(not(feature = "tracing"))]
            let _: &Error = &e;
            *slot = None;
            session.deactivate();
            self.inner.transition(Transition::Lost);
            return ConnectOutcome::Failed;
        }

        ConnectOutcome::Started { attempt }
    }

    /// Tear everything down: subscriptions, session, attempt counter and scheduled work.
    ///
    /// Idempotent.
    pub fn disconnect(&self) {
        self.inner.cancel_tasks();

        let active = self.inner.write_session().take();
        self.inner
            .subscriptions
            .clear_all(active.as_ref().map(ActiveSession::attachment));
        if let Some(active) = &active {
            active.session.deactivate();
        }

        #[cfg(feature = "tracing")]
        tracing::info!(had_session = active.is_some(), "Disconnected");

        self.inner.attempts.store(0, Ordering::Release);
        self.inner.transition(Transition::Lost);
    }

    /// Reset the attempt counter, disconnect, and connect again after
    /// [`Config::force_reconnect_delay`].
    ///
    /// The scheduled connect is dropped if [`Client::disconnect`] runs first.
    pub fn force_reconnect(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!("Forcing reconnect");

        self.inner.attempts.store(0, Ordering::Release);
        self.disconnect();

        let token = self.inner.task_token();
        let inner = Arc::downgrade(&self.inner);
        let delay = self.inner.config.force_reconnect_delay;

        tokio::spawn(async move {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Scheduled reconnect cancelled");
                }
                () = sleep(delay) => {
                    if let Some(inner) = inner.upgrade() {
                        let _outcome = Client { inner }.connect();
                    }
                }
            }
        });
    }

    /// Register `handler` on `destination` under `id`, or a generated id when `None`.
    ///
    /// An id that is already registered returns its existing handle without attaching
    /// again. When not connected the call waits, polling every
    /// [`Config::subscribe_retry_interval`], until the session is up. It gives up with
    /// `None` when [`Client::disconnect`] runs, when connect attempts run out with no
    /// live session, after [`Config::subscribe_retry_limit`] polls, or when the session
    /// rejects the destination.
    pub async fn subscribe<H>(
        &self,
        destination: &str,
        handler: H,
        id: Option<&str>,
    ) -> Option<SubscriptionHandle>
    where
        H: Fn(Message) + Send + Sync + 'static,
    {
        let id = id.map_or_else(
            || self.inner.subscriptions.generate_id(destination),
            str::to_owned,
        );
        if let Some(existing) = self.inner.subscriptions.handle(&id) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%id, "Reusing existing subscription");
            return Some(existing);
        }

        if !self.is_connected() && !self.wait_until_connected(&id, destination).await {
            return None;
        }

        self.attach(id, destination, Arc::new(handler))
    }

    fn attach(
        &self,
        id: String,
        destination: &str,
        handler: MessageHandler,
    ) -> Option<SubscriptionHandle> {
        // Held across the attach so the handle's epoch matches the session it lands on.
        let guard = self.inner.read_session();
        let Some(active) = guard.as_ref() else {
            #[cfg(feature = "tracing")]
            tracing::warn!(%id, %destination, "Cannot subscribe without a session");
            return None;
        };

        match self
            .inner
            .subscriptions
            .attach(id, destination, handler, active.attachment())
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%destination, error = %e, "Subscription failed");
                #[cfg(not(feature = "tracing"))]
                let _: &Error = &e;
                None
            }
        }
    }

    /// Poll until connected. Returns `false` when the wait is abandoned.
    async fn wait_until_connected(&self, id: &str, destination: &str) -> bool {
        let token = self.inner.task_token();
        let period = self.inner.config.subscribe_retry_interval;
        let limit = self.inner.config.subscribe_retry_limit;

        #[cfg(feature = "tracing")]
        tracing::debug!(%id, %destination, ?period, "Not connected; waiting to subscribe");
        #[cfg(not(feature = "tracing"))]
        let _: (&str, &str) = (id, destination);

        let mut polls: u32 = 0;
        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%id, "Pending subscription cancelled by disconnect");
                    return false;
                }
                () = sleep(period) => {}
            }

            if self.is_connected() {
                return true;
            }

            polls = polls.saturating_add(1);
            if self.inner.attempts_exhausted() {
                #[cfg(feature = "tracing")]
                tracing::warn!(%id, "Connect attempts exhausted; giving up on subscription");
                return false;
            }
            if limit.is_some_and(|limit| polls >= limit) {
                #[cfg(feature = "tracing")]
                tracing::warn!(%id, polls, "Still not connected; giving up on subscription");
                return false;
            }
        }
    }

    /// Remove the subscription registered under `id`.
    ///
    /// Returns `false` when no such id exists; other ids are never touched.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let guard = self.inner.read_session();
        self.inner
            .subscriptions
            .detach(id, guard.as_ref().map(ActiveSession::attachment))
    }

    /// Detach and forget every subscription. The session stays up.
    pub fn clear_all_subscriptions(&self) {
        let guard = self.inner.read_session();
        self.inner
            .subscriptions
            .clear_all(guard.as_ref().map(ActiveSession::attachment));
    }

    /// Re-attach registered subscriptions to the current session.
    ///
    /// Runs automatically whenever the session is established; calling it by hand
    /// while disconnected does nothing.
    pub fn restore_subscriptions(&self) -> RestoreReport {
        self.inner.restore_subscriptions()
    }

    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.is_connected(),
            subscription_count: self.inner.subscriptions.len(),
            subscription_ids: self.inner.subscriptions.ids(),
        }
    }

    /// Diagnostic snapshot. A leftover session while disconnected triggers
    /// [`Client::force_reconnect`].
    pub fn check_connection(&self) -> ConnectionCheck {
        let (has_session, session_active) = {
            let guard = self.inner.read_session();
            guard
                .as_ref()
                .map_or((false, false), |active| (true, active.session.is_active()))
        };

        let state = self.connection_state();
        let check = ConnectionCheck {
            connected: state.is_connected(),
            has_session,
            session_active,
            user_id: self.current_user_id(),
            attempts: self.attempts(),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(?check, "Connection check");

        // A session mid-handshake is left alone.
        if matches!(state, ConnectionState::Disconnected) && check.has_session {
            #[cfg(feature = "tracing")]
            tracing::warn!("Session present but not connected");
            self.force_reconnect();
        }

        check
    }

    /// Resolve once connected, or fail with [`crate::error::Kind::Timeout`] after `limit`.
    pub async fn wait_for_connection(&self, limit: Duration) -> Result<()> {
        let mut ticker = interval(self.inner.config.wait_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let poll = async {
            loop {
                ticker.tick().await;
                if self.is_connected() {
                    return;
                }
            }
        };

        timeout(limit, poll)
            .await
            .map_err(|_e| Error::timeout(limit))
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Connect attempts since the last success or reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Stream of state transitions, starting after the current state.
    pub fn state_changes(&self) -> impl Stream<Item = ConnectionState> + use<> {
        let mut rx = self.state_receiver();

        stream! {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                yield state;
            }
        }
    }

    /// Registered subscriptions, sorted by id.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.subscriptions.infos()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Subscribe `handler` to a well-known channel under its fixed id.
    pub async fn subscribe_channel<H>(
        &self,
        channel: Channel,
        handler: H,
    ) -> Option<SubscriptionHandle>
    where
        H: Fn(Message) + Send + Sync + 'static,
    {
        self.subscribe(
            channel.destination(),
            handler,
            Some(channel.subscription_id()),
        )
        .await
    }

    pub fn unsubscribe_channel(&self, channel: Channel) -> bool {
        self.unsubscribe(channel.subscription_id())
    }

    /// `/user/queue/notifications` under id `notifications`.
    pub async fn subscribe_notifications<H>(&self, handler: H) -> Option<SubscriptionHandle>
    where
        H: Fn(Message) + Send + Sync + 'static,
    {
        self.subscribe_channel(Channel::Notifications, handler).await
    }

    /// `/user/queue/notification-count` under id `notification-count`.
    pub async fn subscribe_notification_count<H>(&self, handler: H) -> Option<SubscriptionHandle>
    where
        H: Fn(Message) + Send + Sync + 'static,
    {
        self.subscribe_channel(Channel::NotificationCount, handler)
            .await
    }

    /// `/user/queue/chat-messages` under id `chat-messages`.
    pub async fn subscribe_chat_messages<H>(&self, handler: H) -> Option<SubscriptionHandle>
    where
        H: Fn(Message) + Send + Sync + 'static,
    {
        self.subscribe_channel(Channel::ChatMessages, handler).await
    }

    /// `/user/queue/chat-unread-count` under id `chat-unread-count`.
    pub async fn subscribe_chat_unread_count<H>(&self, handler: H) -> Option<SubscriptionHandle>
    where
        H: Fn(Message) + Send + Sync + 'static,
    {
        self.subscribe_channel(Channel::ChatUnreadCount, handler)
            .await
    }

    fn current_user_id(&self) -> Option<UserId> {
        self.inner
            .identity
            .current_user_id()
            .filter(|id| !id.is_anonymous())
    }
}

impl ClientInner {
    fn read_session(&self) -> std::sync::RwLockReadGuard<'_, Option<ActiveSession>> {
        // The slot is replaced in a single assignment, so a poisoned lock still holds a
        // coherent value.
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_session(&self) -> std::sync::RwLockWriteGuard<'_, Option<ActiveSession>> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, transition: Transition) {
        self.state_tx.send_if_modified(|state| {
            let next = state.apply(transition);
            let changed = next != *state;
            *state = next;
            changed
        });
    }

    /// Token for newly scheduled work; cancelled by the next `disconnect`.
    fn task_token(&self) -> CancellationToken {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cancel_tasks(&self) {
        let previous = std::mem::replace(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
            CancellationToken::new(),
        );
        previous.cancel();
    }

    /// Attempts are used up and no session is alive to recover on its own.
    fn attempts_exhausted(&self) -> bool {
        if self.attempts.load(Ordering::Acquire) < self.config.max_connect_attempts {
            return false;
        }
        !self
            .read_session()
            .as_ref()
            .is_some_and(|active| active.session.is_active())
    }

    fn restore_subscriptions(&self) -> RestoreReport {
        if !self.state_tx.borrow().is_connected() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Not connected; nothing to restore onto");
            return RestoreReport::default();
        }

        let guard = self.read_session();
        match guard.as_ref() {
            Some(active) => self.subscriptions.restore(active.attachment()),
            None => RestoreReport::default(),
        }
    }

    fn handle_event(&self, event: SessionEvent) {
        match event.kind {
            SessionEventKind::Established => {
                {
                    let mut slot = self.write_session();
                    let Some(active) = slot
                        .as_mut()
                        .filter(|active| active.generation == event.generation)
                    else {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(generation = event.generation, "Ignoring stale event");
                        return;
                    };
                    active.epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                    self.attempts.store(0, Ordering::Release);
                    self.transition(Transition::Established);
                }

                #[cfg(feature = "tracing")]
                tracing::info!(generation = event.generation, "Connected");

                self.restore_subscriptions();
            }
            kind => {
                if !self.is_current(event.generation) {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(generation = event.generation, "Ignoring stale event");
                    return;
                }

                match &kind {
                    SessionEventKind::ProtocolError(_reason) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(reason = %_reason, "STOMP error");
                    }
                    SessionEventKind::TransportError(_reason) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(reason = %_reason, "WebSocket error");
                    }
                    _ => {
                        #[cfg(feature = "tracing")]
                        tracing::info!("Connection closed");
                    }
                }

                self.transition(Transition::Lost);
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.read_session()
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.cancel_tasks();
        if let Some(active) = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            active.session.deactivate();
        }
    }
}

/// Apply session events in arrival order until the client or every session is gone.
async fn run_event_loop(
    inner: Weak<ClientInner>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{CurrentMember, MemberStore};

    struct RefusingConnector;

    impl Connector for RefusingConnector {
        fn connect(&self, _config: &Config, _events: EventSink) -> Result<Arc<dyn Session>> {
            Err(Error::validation("refused"))
        }
    }

    fn logged_in() -> Arc<MemberStore> {
        let store = Arc::new(MemberStore::new());
        store.set_current_member(CurrentMember::new(1, "member"));
        store
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = Config::builder().endpoint("http://localhost/ws").build();

        assert!(Client::new(config, logged_in()).is_err(), "http is not a websocket");
    }

    #[tokio::test]
    async fn connect_without_identity_is_a_no_op() {
        let client = Client::with_connector(
            Config::default(),
            Arc::new(MemberStore::new()),
            Arc::new(RefusingConnector),
        )
        .expect("valid config");

        assert_eq!(client.connect(), ConnectOutcome::NotAuthenticated);
        assert_eq!(client.attempts(), 0);
    }

    #[tokio::test]
    async fn connector_failure_counts_as_attempt() {
        let client =
            Client::with_connector(Config::default(), logged_in(), Arc::new(RefusingConnector))
                .expect("valid config");

        assert_eq!(client.connect(), ConnectOutcome::Failed);
        assert_eq!(client.attempts(), 1);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let client =
            Client::with_connector(Config::default(), logged_in(), Arc::new(RefusingConnector))
                .expect("valid config");
        let _outcome = client.connect();

        client.disconnect();
        client.disconnect();

        assert_eq!(client.attempts(), 0);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn restore_while_disconnected_does_nothing() {
        let client =
            Client::with_connector(Config::default(), logged_in(), Arc::new(RefusingConnector))
                .expect("valid config");

        assert_eq!(client.restore_subscriptions(), RestoreReport::default());
    }
}
