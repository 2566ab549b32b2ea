//! Terminal handling of a package after its verdict.
//!
//! State machine: `pending -> {moved | quarantined | left_in_place} -> notified`.
//! Relocation is a store-side copy followed by a delete, so a failed delete
//! never loses a package, and re-running a completed move is a no-op. An
//! object already sitting at the target is never replaced.

use std::sync::Arc;

use av_storage::{ObjectLocation, ObjectStore, StorageError};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::aggregate::{PackageVerdict, Verdict};
use crate::config::ValidatorConfig;
use crate::error::ValidationError;
use crate::notify::{Notification, Notifier};
use crate::obs;
use crate::package::MediaType;
use crate::retry::{with_retry, with_retry_within, RetryPolicy};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DispositionState {
    Pending,
    Moved,
    Quarantined,
    LeftInPlace,
    Notified,
}

impl DispositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispositionState::Pending => "pending",
            DispositionState::Moved => "moved",
            DispositionState::Quarantined => "quarantined",
            DispositionState::LeftInPlace => "left_in_place",
            DispositionState::Notified => "notified",
        }
    }

    pub fn can_transition_to(&self, next: DispositionState) -> bool {
        use DispositionState::*;
        matches!(
            (self, next),
            (Pending, Moved | Quarantined | LeftInPlace)
                | (Moved | Quarantined | LeftInPlace, Notified)
        )
    }
}

/// Result of dispatching one package.
#[derive(Debug, Clone, Serialize)]
pub struct Disposition {
    /// The terminal action taken: moved, quarantined or left in place.
    pub action: DispositionState,
    /// Final verdict, escalated to `error` if relocation failed.
    pub verdict: PackageVerdict,
    /// Where the package ended up, if it was relocated.
    pub location: Option<ObjectLocation>,
    pub notification: Notification,
    pub delivered: bool,
    /// Every state visited, starting with `pending`.
    pub history: Vec<DispositionState>,
}

impl Disposition {
    pub fn state(&self) -> DispositionState {
        self.history
            .last()
            .copied()
            .unwrap_or(DispositionState::Pending)
    }
}

/// Where a relocation stopped.
#[derive(Debug, thiserror::Error)]
pub enum RelocateError {
    /// Nothing was written; the source is untouched.
    #[error("copy failed: {0}")]
    Copy(StorageError),

    /// The copy exists at the target; the source still needs deleting.
    #[error("copied, but deleting the source failed: {0}")]
    Delete(StorageError),

    /// Another package already occupies the target; the source is untouched.
    #[error("target {0} already exists")]
    TargetExists(ObjectLocation),
}

impl RelocateError {
    pub fn into_validation(self, refid: &str) -> ValidationError {
        match self {
            RelocateError::Copy(e) | RelocateError::Delete(e) => ValidationError::Disposition(e),
            RelocateError::TargetExists(existing) => ValidationError::AlreadyExists {
                refid: refid.to_string(),
                existing,
            },
        }
    }
}

pub struct DispositionDispatcher {
    store: Arc<dyn ObjectStore>,
    notifier: Arc<dyn Notifier>,
    destination_bucket: String,
    quarantine_bucket: Option<String>,
    environment: String,
    retry: RetryPolicy,
}

impl DispositionDispatcher {
    pub fn new(
        config: &ValidatorConfig,
        store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            notifier,
            destination_bucket: config.destination_bucket.clone(),
            quarantine_bucket: config.quarantine_bucket.clone(),
            environment: config.environment.clone(),
            retry: config.retry.clone(),
        }
    }

    /// `<bucket>/<refid>/<source file name>`.
    pub fn target_in(bucket: &str, refid: &str, source: &ObjectLocation) -> ObjectLocation {
        let prefix = if refid.is_empty() { "unidentified" } else { refid };
        ObjectLocation::new(bucket, format!("{prefix}/{}", source.file_name()))
    }

    /// Copy `source` to `target`, then delete `source`.
    ///
    /// A source that is already gone while the target exists counts as a
    /// completed earlier move. A target that exists while the source is still
    /// present belongs to another delivery and is left alone.
    pub async fn relocate(
        &self,
        source: &ObjectLocation,
        target: &ObjectLocation,
    ) -> Result<(), RelocateError> {
        let store = self.store.as_ref();

        let size = match with_retry(&self.retry, "size", || store.size(source)).await {
            Ok(size) => size,
            Err(err @ StorageError::NotFound { .. }) => {
                if self.target_exists(target).await? {
                    warn!(source = %source, target = %target, "source already relocated");
                    return Ok(());
                }
                return Err(RelocateError::Copy(err));
            }
            Err(e) => return Err(RelocateError::Copy(e)),
        };

        if self.target_exists(target).await? {
            return Err(RelocateError::TargetExists(target.clone()));
        }

        let deadline = self.retry.transfer_timeout_ms(size);
        with_retry_within(&self.retry, "copy", deadline, || store.copy(source, target))
            .await
            .map_err(RelocateError::Copy)?;

        with_retry(&self.retry, "delete", || store.delete(source))
            .await
            .map_err(RelocateError::Delete)
    }

    async fn target_exists(&self, target: &ObjectLocation) -> Result<bool, RelocateError> {
        let store = self.store.as_ref();
        with_retry(&self.retry, "exists", || store.exists(target))
            .await
            .map_err(RelocateError::Copy)
    }

    /// Apply the verdict to the source object and publish exactly one
    /// notification.
    pub async fn dispatch(
        &self,
        refid: &str,
        media_type: MediaType,
        source: &ObjectLocation,
        verdict: PackageVerdict,
    ) -> Disposition {
        let mut history = vec![DispositionState::Pending];
        let mut verdict = verdict;
        let mut location = None;

        let action = match verdict.verdict {
            Verdict::Pass => {
                let target = Self::target_in(&self.destination_bucket, refid, source);
                match self.relocate(source, &target).await {
                    Ok(()) => {
                        location = Some(target);
                        DispositionState::Moved
                    }
                    Err(e @ RelocateError::Delete(_)) => {
                        error!(source = %source, error = %e, "package copied but source not deleted");
                        verdict = verdict.into_error(&e.into_validation(refid));
                        location = Some(target);
                        DispositionState::Moved
                    }
                    Err(e) => {
                        error!(source = %source, error = %e, "package could not be moved");
                        verdict = verdict.into_error(&e.into_validation(refid));
                        DispositionState::LeftInPlace
                    }
                }
            }
            Verdict::Fail | Verdict::Error => match &self.quarantine_bucket {
                Some(bucket) => {
                    let target = Self::target_in(bucket, refid, source);
                    match self.relocate(source, &target).await {
                        Ok(()) => {
                            location = Some(target);
                            DispositionState::Quarantined
                        }
                        Err(e) => {
                            let moved = matches!(e, RelocateError::Delete(_));
                            let err = e.into_validation(refid);
                            warn!(source = %source, error = %err, "quarantine incomplete");
                            if verdict.verdict != Verdict::Error {
                                verdict = verdict.into_error(&err);
                            }
                            if moved {
                                location = Some(target);
                                DispositionState::Quarantined
                            } else {
                                DispositionState::LeftInPlace
                            }
                        }
                    }
                }
                None => DispositionState::LeftInPlace,
            },
        };

        debug_assert!(DispositionState::Pending.can_transition_to(action));
        history.push(action);
        obs::emit_disposition(
            refid,
            action,
            location.as_ref().map(|l| l.to_string()).as_deref(),
        );

        let notification =
            Notification::for_package(&self.environment, refid, media_type, &verdict, action);
        let notifier = self.notifier.as_ref();
        let delivered = match with_retry(&self.retry, "publish", || notifier.publish(&notification))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    refid = %refid,
                    message_id = %notification.message_id,
                    error = %e,
                    "notification could not be delivered"
                );
                false
            }
        };
        obs::emit_notification(refid, &notification.message_id.to_string(), delivered);
        if delivered {
            history.push(DispositionState::Notified);
        }

        Disposition {
            action,
            verdict,
            location,
            notification,
            delivered,
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryNotifier;
    use av_storage::fakes::{MemoryObjectStore, StoreOp};

    const REFID: &str = "b90862f3baceaae3b7418c78f9d50d52";

    fn setup(
        quarantine: Option<&str>,
    ) -> (Arc<MemoryObjectStore>, Arc<MemoryNotifier>, DispositionDispatcher, ObjectLocation) {
        let mut config = ValidatorConfig::new("audio-src", "dest", "/tmp", "/policies");
        config.quarantine_bucket = quarantine.map(str::to_string);
        config.retry = RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
            attempt_timeout_ms: 1_000,
            ..RetryPolicy::default()
        };
        let store = Arc::new(MemoryObjectStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let source = ObjectLocation::new("audio-src", format!("{REFID}.tar.gz"));
        store.insert(source.clone(), b"archive".to_vec());
        let dispatcher = DispositionDispatcher::new(&config, store.clone(), notifier.clone());
        (store, notifier, dispatcher, source)
    }

    fn dest() -> ObjectLocation {
        ObjectLocation::new("dest", format!("{REFID}/{REFID}.tar.gz"))
    }

    fn verdict_of(verdict: Verdict) -> PackageVerdict {
        let mut v = PackageVerdict::aggregate(Vec::new());
        v.verdict = verdict;
        v.stage_error = None;
        v
    }

    fn pass_verdict() -> PackageVerdict {
        verdict_of(Verdict::Pass)
    }

    #[test]
    fn transitions() {
        use DispositionState::*;
        assert!(Pending.can_transition_to(Moved));
        assert!(LeftInPlace.can_transition_to(Notified));
        assert!(!Pending.can_transition_to(Notified));
        assert!(!Moved.can_transition_to(Quarantined));
        assert!(!Notified.can_transition_to(Moved));
    }

    #[tokio::test]
    async fn pass_moves_then_notifies() {
        let (store, notifier, dispatcher, source) = setup(None);
        let d = dispatcher
            .dispatch(REFID, MediaType::Audio, &source, pass_verdict())
            .await;

        assert_eq!(d.action, DispositionState::Moved);
        assert_eq!(d.state(), DispositionState::Notified);
        assert_eq!(
            d.history,
            vec![
                DispositionState::Pending,
                DispositionState::Moved,
                DispositionState::Notified
            ]
        );
        assert!(!store.contains(&source));
        assert_eq!(store.object(&dest()).unwrap(), b"archive");
        assert_eq!(notifier.published().len(), 1);
    }

    #[tokio::test]
    async fn relocate_is_idempotent() {
        let (store, _notifier, dispatcher, source) = setup(None);
        dispatcher.relocate(&source, &dest()).await.unwrap();
        dispatcher.relocate(&source, &dest()).await.unwrap();
        assert!(!store.contains(&source));
        assert!(store.contains(&dest()));
    }

    #[tokio::test]
    async fn copy_failure_leaves_source_and_errors() {
        let (store, notifier, dispatcher, source) = setup(None);
        store.fail_always(StoreOp::Copy);

        let d = dispatcher
            .dispatch(REFID, MediaType::Audio, &source, pass_verdict())
            .await;
        assert_eq!(d.action, DispositionState::LeftInPlace);
        assert_eq!(d.verdict.verdict, Verdict::Error);
        assert!(store.contains(&source));
        let published = notifier.published();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].error_kind,
            Some(crate::error::ErrorKind::DispositionError)
        );
    }

    #[tokio::test]
    async fn delete_failure_is_moved_with_error() {
        let (store, _notifier, dispatcher, source) = setup(None);
        store.fail_always(StoreOp::Delete);

        let d = dispatcher
            .dispatch(REFID, MediaType::Audio, &source, pass_verdict())
            .await;
        assert_eq!(d.action, DispositionState::Moved);
        assert_eq!(d.verdict.verdict, Verdict::Error);
        assert!(store.contains(&source));
        assert!(store.contains(&dest()));
    }

    #[tokio::test]
    async fn transient_copy_is_retried() {
        let (store, _notifier, dispatcher, source) = setup(None);
        store.fail_next(StoreOp::Copy, 2);

        let d = dispatcher
            .dispatch(REFID, MediaType::Audio, &source, pass_verdict())
            .await;
        assert_eq!(d.action, DispositionState::Moved);
        assert_eq!(store.call_count(StoreOp::Copy), 3);
        assert_eq!(store.call_count(StoreOp::Get), 0);
        assert_eq!(store.call_count(StoreOp::Put), 0);
    }

    #[tokio::test]
    async fn queued_package_at_destination_is_not_replaced() {
        let (store, notifier, dispatcher, source) = setup(None);
        store.insert(dest(), b"package awaiting QC".to_vec());

        let d = dispatcher
            .dispatch(REFID, MediaType::Audio, &source, pass_verdict())
            .await;

        assert_eq!(d.action, DispositionState::LeftInPlace);
        assert_eq!(d.verdict.verdict, Verdict::Error);
        assert_eq!(d.location, None);
        assert_eq!(store.object(&source).unwrap(), b"archive");
        assert_eq!(store.object(&dest()).unwrap(), b"package awaiting QC");
        assert_eq!(store.call_count(StoreOp::Copy), 0);
        assert_eq!(store.call_count(StoreOp::Delete), 0);

        let published = notifier.published();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].error_kind,
            Some(crate::error::ErrorKind::AlreadyExistsError)
        );
        assert!(published[0].message.contains("already waiting to be QCed"));
    }

    #[tokio::test]
    async fn undelivered_notification_still_returns_outcome() {
        let (store, notifier, dispatcher, source) = setup(None);
        notifier.fail_always();

        let d = dispatcher
            .dispatch(REFID, MediaType::Audio, &source, pass_verdict())
            .await;

        assert!(!d.delivered);
        assert_eq!(d.action, DispositionState::Moved);
        assert_eq!(d.state(), DispositionState::Moved);
        assert!(!d.history.contains(&DispositionState::Notified));
        assert_eq!(d.verdict.verdict, Verdict::Pass);
        assert!(store.contains(&dest()));
        assert!(notifier.published().is_empty());
        assert_eq!(notifier.attempted_ids().len(), 3);
    }

    #[tokio::test]
    async fn failed_quarantine_escalates_fail_to_error() {
        let (store, notifier, dispatcher, source) = setup(Some("quarantine"));
        store.fail_always(StoreOp::Copy);

        let d = dispatcher
            .dispatch(REFID, MediaType::Audio, &source, verdict_of(Verdict::Fail))
            .await;

        assert_eq!(d.action, DispositionState::LeftInPlace);
        assert_eq!(d.verdict.verdict, Verdict::Error);
        assert_eq!(d.location, None);
        assert!(store.contains(&source));
        let published = notifier.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].verdict, Verdict::Error);
        assert_eq!(
            published[0].error_kind,
            Some(crate::error::ErrorKind::DispositionError)
        );
    }

    #[tokio::test]
    async fn failure_without_quarantine_leaves_in_place() {
        let (store, notifier, dispatcher, source) = setup(None);
        let verdict = PackageVerdict::from_stage_error(&ValidationError::RefId {
            refid: "bad".to_string(),
        });
        let d = dispatcher
            .dispatch("bad", MediaType::Audio, &source, verdict)
            .await;
        assert_eq!(d.action, DispositionState::LeftInPlace);
        assert!(store.contains(&source));
        assert_eq!(store.call_count(StoreOp::Copy), 0);
        assert_eq!(notifier.published()[0].outcome, "FAILURE");
    }

    #[tokio::test]
    async fn failure_with_quarantine_relocates() {
        let (store, _notifier, dispatcher, source) = setup(Some("quarantine"));
        let verdict = PackageVerdict::from_stage_error(&ValidationError::BagIntegrity {
            problems: Vec::new(),
        });
        let d = dispatcher
            .dispatch(REFID, MediaType::Audio, &source, verdict)
            .await;
        assert_eq!(d.action, DispositionState::Quarantined);
        assert!(!store.contains(&source));
        assert!(store.contains(&ObjectLocation::new(
            "quarantine",
            format!("{REFID}/{REFID}.tar.gz")
        )));
    }

    #[tokio::test]
    async fn retried_notification_keeps_one_message_id() {
        let (_store, notifier, dispatcher, source) = setup(None);
        notifier.fail_next(2);

        let d = dispatcher
            .dispatch(REFID, MediaType::Audio, &source, pass_verdict())
            .await;
        assert!(d.delivered);
        let attempts = notifier.attempted_ids();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|id| *id == d.notification.message_id));
        assert_eq!(notifier.published().len(), 1);
    }
}
