#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each integration test binary uses a different subset of these helpers"
)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stomp_link::error::Error;
use stomp_link::identity::{CurrentMember, MemberStore};
use stomp_link::stomp::Message;
use stomp_link::ws::config::Config;
use stomp_link::ws::{Connector, EventSink, MessageHandler, Session, SessionEventKind};
use stomp_link::{Client, Result};

pub const USER_ID: u64 = 42;

/// What a [`MockSession`] reports when activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Report `Established` right away
    Establish,
    /// Report a transport error and go inactive
    TransportError,
    /// Report nothing
    Silent,
}

/// In-memory [`Session`] driven by the test.
pub struct MockSession {
    events: EventSink,
    behavior: Behavior,
    rejected: Mutex<Vec<String>>,
    active: AtomicBool,
    /// receipt -> (destination, handler)
    attached: Mutex<HashMap<String, (String, MessageHandler)>>,
    next_receipt: AtomicUsize,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl MockSession {
    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    /// Deliver `body` to every handler attached to `destination`. Returns the number of
    /// handlers invoked.
    pub fn deliver(&self, destination: &str, body: &str) -> usize {
        let targets: Vec<(String, MessageHandler)> = self
            .attached
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (dest, _))| dest == destination)
            .map(|(receipt, (_, handler))| (receipt.clone(), Arc::clone(handler)))
            .collect();

        for (receipt, handler) in &targets {
            handler(Message::new(destination, receipt.as_str(), body));
        }
        targets.len()
    }

    /// Lose the transport: every attachment is gone and a transport error is reported.
    /// The session stays active, like one waiting for its low-level reconnect.
    pub fn drop_transport(&self) {
        self.attached.lock().unwrap().clear();
        self.events
            .emit(SessionEventKind::TransportError("connection reset".to_owned()));
    }

    /// Refuse future attaches of `destination`.
    pub fn reject(&self, destination: &str) {
        self.rejected.lock().unwrap().push(destination.to_owned());
    }

    pub fn emit(&self, kind: SessionEventKind) {
        self.events.emit(kind);
    }

    pub fn attached_destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self
            .attached
            .lock()
            .unwrap()
            .values()
            .map(|(dest, _)| dest.clone())
            .collect();
        destinations.sort();
        destinations
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }
}

impl Session for MockSession {
    fn activate(&self) -> Result<()> {
        self.active.store(true, Ordering::SeqCst);
        match self.behavior {
            Behavior::Establish => {
                self.events.emit(SessionEventKind::Established);
            }
            Behavior::TransportError => {
                self.active.store(false, Ordering::SeqCst);
                self.events
                    .emit(SessionEventKind::TransportError("connection refused".to_owned()));
            }
            Behavior::Silent => {}
        }
        Ok(())
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.attached.lock().unwrap().clear();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn subscribe(&self, destination: &str, handler: MessageHandler) -> Result<String> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .rejected
            .lock()
            .unwrap()
            .iter()
            .any(|rejected| rejected == destination)
        {
            return Err(Error::validation(format!("destination {destination} rejected")));
        }
        let receipt = format!(
            "sub-{}",
            self.next_receipt.fetch_add(1, Ordering::SeqCst)
        );
        self.attached
            .lock()
            .unwrap()
            .insert(receipt.clone(), (destination.to_owned(), handler));
        Ok(receipt)
    }

    fn unsubscribe(&self, receipt: &str) -> Result<()> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        match self.attached.lock().unwrap().remove(receipt) {
            Some(_) => Ok(()),
            None => Err(Error::validation(format!("unknown receipt {receipt}"))),
        }
    }
}

/// [`Connector`] handing out [`MockSession`]s, following a script of behaviors.
pub struct MockConnector {
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    rejected: Vec<String>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockConnector {
    pub fn new(fallback: Behavior) -> Self {
        Self::scripted([], fallback)
    }

    /// Sessions take their behavior from `script` in order, then `fallback`.
    pub fn scripted<I: IntoIterator<Item = Behavior>>(script: I, fallback: Behavior) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            rejected: Vec::new(),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Sessions refuse to attach `destination`.
    pub fn rejecting(mut self, destination: &str) -> Self {
        self.rejected.push(destination.to_owned());
        self
    }

    pub fn connects(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn latest(&self) -> Arc<MockSession> {
        Arc::clone(self.sessions.lock().unwrap().last().unwrap())
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }
}

impl Connector for MockConnector {
    fn connect(&self, _config: &Config, events: EventSink) -> Result<Arc<dyn Session>> {
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        let session = Arc::new(MockSession {
            events,
            behavior,
            rejected: Mutex::new(self.rejected.clone()),
            active: AtomicBool::new(false),
            attached: Mutex::new(HashMap::new()),
            next_receipt: AtomicUsize::new(1),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

pub fn logged_in() -> Arc<MemberStore> {
    let store = Arc::new(MemberStore::new());
    store.set_current_member(CurrentMember::new(USER_ID, "runner"));
    store
}

/// Short intervals so waiting paths finish quickly.
pub fn fast_config() -> Config {
    Config::builder()
        .subscribe_retry_interval(Duration::from_millis(20))
        .force_reconnect_delay(Duration::from_millis(50))
        .wait_poll_interval(Duration::from_millis(10))
        .build()
}

pub fn client_with(connector: &Arc<MockConnector>) -> Client {
    Client::with_connector(
        fast_config(),
        logged_in(),
        Arc::clone(connector) as Arc<dyn Connector>,
    )
    .unwrap()
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Handler counting invocations into `counter`.
pub fn counting(counter: &Arc<AtomicUsize>) -> impl Fn(Message) + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move |_: Message| {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}
