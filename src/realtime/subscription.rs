#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, Entry};
use rand::Rng as _;
use rand::distr::Alphanumeric;

use super::types::{RestoreReport, SubscriptionHandle, SubscriptionInfo};
use crate::Result;
use crate::ws::{MessageHandler, Session};

const GENERATED_SUFFIX_LEN: usize = 9;

/// The session a registry operation acts on, with the counters its handles are tagged with.
#[derive(Clone, Copy)]
pub(crate) struct Attachment<'session> {
    pub session: &'session dyn Session,
    pub generation: u64,
    pub epoch: u64,
}

struct SubscriptionRecord {
    destination: String,
    handler: MessageHandler,
    created_at: DateTime<Utc>,
    live: SubscriptionHandle,
}

/// Id-keyed registry of logical subscriptions.
///
/// Ids are the only dedup key: the same destination may be registered under any
/// number of ids, each with its own handler.
#[derive(Default)]
pub struct SubscriptionManager {
    records: DashMap<String, SubscriptionRecord>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `{destination}_{unix-millis}_{9 alphanumerics}`, unique within the registry.
    #[must_use]
    pub fn generate_id(&self, destination: &str) -> String {
        loop {
            let suffix: String = rand::rng()
                .sample_iter(Alphanumeric)
                .take(GENERATED_SUFFIX_LEN)
                .map(char::from)
                .collect();
            let id = format!(
                "{destination}_{}_{suffix}",
                Utc::now().timestamp_millis()
            );
            if !self.records.contains_key(&id) {
                return id;
            }
        }
    }

    /// Live handle of `id`, if registered.
    #[must_use]
    pub fn handle(&self, id: &str) -> Option<SubscriptionHandle> {
        self.records.get(id).map(|record| record.live.clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.iter().map(|entry| entry.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    /// Registry entries, sorted by id.
    #[must_use]
    pub fn infos(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .records
            .iter()
            .map(|entry| SubscriptionInfo {
                id: entry.key().clone(),
                destination: entry.destination.clone(),
                created_at: entry.created_at,
                receipt: entry.live.receipt.clone(),
            })
            .collect();
        infos.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Attach `handler` under `id` unless the id is already registered.
    ///
    /// An existing id returns its current handle and `handler` is dropped unused. The
    /// entry stays locked across the session call, so two callers racing on one id
    /// attach once.
    pub(crate) fn attach(
        &self,
        id: String,
        destination: &str,
        handler: MessageHandler,
        attachment: Attachment<'_>,
    ) -> Result<SubscriptionHandle> {
        match self.records.entry(id) {
            Entry::Occupied(entry) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(id = %entry.key(), "Subscription id already registered");
                Ok(entry.get().live.clone())
            }
            Entry::Vacant(entry) => {
                let receipt = attachment
                    .session
                    .subscribe(destination, Arc::clone(&handler))?;
                let live = SubscriptionHandle {
                    id: entry.key().clone(),
                    destination: destination.to_owned(),
                    receipt,
                    generation: attachment.generation,
                    epoch: attachment.epoch,
                };

                #[cfg(feature = "tracing")]
                tracing::debug!(id = %live.id, %destination, receipt = %live.receipt, "Subscribed");

                entry.insert(SubscriptionRecord {
                    destination: destination.to_owned(),
                    handler,
                    created_at: Utc::now(),
                    live: live.clone(),
                });
                Ok(live)
            }
        }
    }

    /// Remove `id`, detaching it from `attachment` when the handle belongs to that session.
    ///
    /// Detach failures are logged; the record is removed regardless.
    pub(crate) fn detach(&self, id: &str, attachment: Option<Attachment<'_>>) -> bool {
        let Some((_, record)) = self.records.remove(id) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(%id, "No subscription registered under id");
            return false;
        };

        if let Some(attachment) = attachment
            && record.live.generation == attachment.generation
            && let Err(e) = attachment.session.unsubscribe(&record.live.receipt)
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(%id, error = %e, "Failed to detach subscription");
            #[cfg(not(feature = "tracing"))]
            let _: &crate::error::Error = &e;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%id, destination = %record.destination, "Unsubscribed");
        true
    }

    /// Detach and remove every record.
    pub(crate) fn clear_all(&self, attachment: Option<Attachment<'_>>) -> usize {
        let ids: Vec<String> = self.records.iter().map(|entry| entry.key().clone()).collect();
        let removed = ids
            .iter()
            .filter(|id| self.detach(id, attachment))
            .count();

        #[cfg(feature = "tracing")]
        tracing::debug!(removed, "Cleared all subscriptions");
        removed
    }

    /// Re-attach every record not yet attached in `attachment.epoch`, keeping its id.
    ///
    /// Works on a snapshot of the ids and swaps each handle in place, so records added
    /// while the pass runs are neither lost nor attached twice.
    pub(crate) fn restore(&self, attachment: Attachment<'_>) -> RestoreReport {
        let mut report = RestoreReport::default();
        let ids: Vec<String> = self.records.iter().map(|entry| entry.key().clone()).collect();

        for id in ids {
            let Some(mut record) = self.records.get_mut(&id) else {
                continue;
            };
            if record.live.epoch == attachment.epoch {
                report.skipped += 1;
                continue;
            }

            // A handle from the same generation may still be live on the current transport.
            if record.live.generation == attachment.generation
                && let Err(_e) = attachment.session.unsubscribe(&record.live.receipt)
            {
                #[cfg(feature = "tracing")]
                tracing::trace!(%id, error = %_e, "Previous receipt already gone");
            }

            match attachment
                .session
                .subscribe(&record.destination, Arc::clone(&record.handler))
            {
                Ok(receipt) => {
                    record.live = SubscriptionHandle {
                        id: id.clone(),
                        destination: record.destination.clone(),
                        receipt,
                        generation: attachment.generation,
                        epoch: attachment.epoch,
                    };
                    report.restored += 1;
                }
                Err(e) => {
                    drop(record);
                    self.records
                        .remove_if(&id, |_, record| record.live.epoch != attachment.epoch);
                    report.dropped += 1;

                    #[cfg(feature = "tracing")]
                    tracing::warn!(%id, error = %e, "Dropping subscription that failed to restore");
                    #[cfg(not(feature = "tracing"))]
                    let _: &crate::error::Error = &e;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            restored = report.restored,
            skipped = report.skipped,
            dropped = report.dropped,
            "Restored subscriptions"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;
    use crate::stomp::Message;

    /// Session that records SUBSCRIBE/UNSUBSCRIBE calls in memory.
    #[derive(Default)]
    struct RecordingSession {
        subscribed: Mutex<Vec<(String, String)>>,
        unsubscribed: Mutex<Vec<String>>,
        rejected: HashSet<String>,
        next: Mutex<u32>,
    }

    impl RecordingSession {
        fn rejecting(destination: &str) -> Self {
            Self {
                rejected: HashSet::from([destination.to_owned()]),
                ..Self::default()
            }
        }

        fn subscribe_count(&self) -> usize {
            self.subscribed.lock().expect("lock").len()
        }
    }

    impl Session for RecordingSession {
        fn activate(&self) -> Result<()> {
            Ok(())
        }

        fn deactivate(&self) {}

        fn is_active(&self) -> bool {
            true
        }

        fn subscribe(&self, destination: &str, _handler: MessageHandler) -> Result<String> {
            if self.rejected.contains(destination) {
                return Err(Error::validation(format!("rejected {destination}")));
            }
            let mut next = self.next.lock().expect("lock");
            *next += 1;
            let receipt = format!("sub-{next}");
            self.subscribed
                .lock()
                .expect("lock")
                .push((receipt.clone(), destination.to_owned()));
            Ok(receipt)
        }

        fn unsubscribe(&self, receipt: &str) -> Result<()> {
            self.unsubscribed.lock().expect("lock").push(receipt.to_owned());
            Ok(())
        }
    }

    fn noop() -> MessageHandler {
        Arc::new(|_: Message| {})
    }

    fn at(session: &RecordingSession, generation: u64, epoch: u64) -> Attachment<'_> {
        Attachment {
            session,
            generation,
            epoch,
        }
    }

    #[test]
    fn generated_ids_embed_destination_and_are_unique() {
        let registry = SubscriptionManager::new();

        let first = registry.generate_id("/topic/feed");
        let second = registry.generate_id("/topic/feed");

        assert!(first.starts_with("/topic/feed_"));
        assert_eq!(first.rsplit('_').next().map(str::len), Some(9));
        assert_ne!(first, second);
    }

    #[test]
    fn same_id_attaches_once() {
        let registry = SubscriptionManager::new();
        let session = RecordingSession::default();

        let first = registry
            .attach("x".to_owned(), "/topic/a", noop(), at(&session, 1, 1))
            .expect("attach");
        let second = registry
            .attach("x".to_owned(), "/topic/b", noop(), at(&session, 1, 1))
            .expect("existing handle");

        assert_eq!(first, second);
        assert_eq!(second.destination, "/topic/a");
        assert_eq!(session.subscribe_count(), 1);
    }

    #[test]
    fn same_destination_under_distinct_ids_coexists() {
        let registry = SubscriptionManager::new();
        let session = RecordingSession::default();

        registry
            .attach("p".to_owned(), "/topic/a", noop(), at(&session, 1, 1))
            .expect("attach p");
        registry
            .attach("q".to_owned(), "/topic/a", noop(), at(&session, 1, 1))
            .expect("attach q");

        assert_eq!(registry.ids(), vec!["p".to_owned(), "q".to_owned()]);
        assert_eq!(session.subscribe_count(), 2);
    }

    #[test]
    fn rejected_attach_is_not_stored() {
        let registry = SubscriptionManager::new();
        let session = RecordingSession::rejecting("/topic/denied");

        let result = registry.attach("d".to_owned(), "/topic/denied", noop(), at(&session, 1, 1));

        assert!(result.is_err(), "session rejected the destination");
        assert!(registry.is_empty());
    }

    #[test]
    fn detach_removes_only_the_named_id() {
        let registry = SubscriptionManager::new();
        let session = RecordingSession::default();
        registry
            .attach("p".to_owned(), "/topic/a", noop(), at(&session, 1, 1))
            .expect("attach p");
        registry
            .attach("q".to_owned(), "/topic/a", noop(), at(&session, 1, 1))
            .expect("attach q");

        assert!(!registry.detach("missing", Some(at(&session, 1, 1))));
        assert!(registry.detach("p", Some(at(&session, 1, 1))));

        assert_eq!(registry.ids(), vec!["q".to_owned()]);
        assert_eq!(*session.unsubscribed.lock().expect("lock"), vec!["sub-1"]);
    }

    #[test]
    fn detach_skips_unsubscribe_for_previous_generation() {
        let registry = SubscriptionManager::new();
        let old = RecordingSession::default();
        let current = RecordingSession::default();
        registry
            .attach("p".to_owned(), "/topic/a", noop(), at(&old, 1, 1))
            .expect("attach");

        assert!(registry.detach("p", Some(at(&current, 2, 2))));
        assert!(current.unsubscribed.lock().expect("lock").is_empty());
    }

    #[test]
    fn clear_all_empties_registry() {
        let registry = SubscriptionManager::new();
        let session = RecordingSession::default();
        for id in ["a", "b", "c"] {
            registry
                .attach(id.to_owned(), "/topic/x", noop(), at(&session, 1, 1))
                .expect("attach");
        }

        assert_eq!(registry.clear_all(None), 3);
        assert!(registry.is_empty());
    }

    #[test]
    fn restore_reattaches_under_same_ids() {
        let registry = SubscriptionManager::new();
        let old = RecordingSession::default();
        let new = RecordingSession::default();
        registry
            .attach("a".to_owned(), "/topic/a", noop(), at(&old, 1, 1))
            .expect("attach a");
        registry
            .attach("b".to_owned(), "/topic/b", noop(), at(&old, 1, 1))
            .expect("attach b");

        let report = registry.restore(at(&new, 2, 2));

        assert_eq!(report.restored, 2);
        assert_eq!(registry.ids(), vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(new.subscribe_count(), 2);
        let handle = registry.handle("a").expect("still registered");
        assert_eq!((handle.generation, handle.epoch), (2, 2));
    }

    #[test]
    fn restore_skips_records_attached_in_current_epoch() {
        let registry = SubscriptionManager::new();
        let session = RecordingSession::default();
        registry
            .attach("fresh".to_owned(), "/topic/a", noop(), at(&session, 1, 2))
            .expect("attach");

        let report = registry.restore(at(&session, 1, 2));

        assert_eq!(report.skipped, 1);
        assert_eq!(session.subscribe_count(), 1);
    }

    #[test]
    fn restore_within_generation_replaces_old_receipt() {
        let registry = SubscriptionManager::new();
        let session = RecordingSession::default();
        registry
            .attach("a".to_owned(), "/topic/a", noop(), at(&session, 1, 1))
            .expect("attach");

        registry.restore(at(&session, 1, 2));

        assert_eq!(*session.unsubscribed.lock().expect("lock"), vec!["sub-1"]);
        assert_eq!(registry.handle("a").map(|h| h.receipt), Some("sub-2".to_owned()));
    }

    #[test]
    fn restore_drops_records_that_fail() {
        let registry = SubscriptionManager::new();
        let old = RecordingSession::default();
        let new = RecordingSession::rejecting("/topic/gone");
        registry
            .attach("keep".to_owned(), "/topic/a", noop(), at(&old, 1, 1))
            .expect("attach keep");
        registry
            .attach("gone".to_owned(), "/topic/gone", noop(), at(&old, 1, 1))
            .expect("attach gone");

        let report = registry.restore(at(&new, 2, 2));

        assert_eq!(report.dropped, 1);
        assert_eq!(registry.ids(), vec!["keep".to_owned()]);
    }
}
