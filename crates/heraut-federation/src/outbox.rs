//! Outbound delivery of local activities to remote inboxes.
//!
//! Each (activity, inbox) attempt is recorded in the deliveries table before
//! and after the POST; the activity is then dispatched as outbound so its
//! local effect (a pending follow edge, a reaction) is applied once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use heraut_shared::constants::{DEFAULT_DELIVERY_CONCURRENCY, DEFAULT_NETWORK_TIMEOUT_SECS};
use heraut_shared::{ObjectId, ProtocolObject};
use heraut_store::SharedDatabase;

use crate::db::with_db;
use crate::dispatcher::{Direction, DispatchReport, Dispatcher};
use crate::error::{FederationError, Result};

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// POST `activity` to one remote inbox.
    async fn post_activity(&self, inbox: &str, activity: &ProtocolObject) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_DELIVERY_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundReport {
    pub activity_id: ObjectId,
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub dispatch: DispatchReport,
}

pub struct Outbox {
    db: SharedDatabase,
    transport: Arc<dyn DeliveryTransport>,
    dispatcher: Dispatcher,
    config: OutboxConfig,
}

impl Outbox {
    pub fn new(
        db: SharedDatabase,
        transport: Arc<dyn DeliveryTransport>,
        dispatcher: Dispatcher,
        config: OutboxConfig,
    ) -> Self {
        Self {
            db,
            transport,
            dispatcher,
            config,
        }
    }

    /// Send `activity` to every inbox, then apply it locally.
    ///
    /// Failed inboxes are reported, not raised; calling this again with the
    /// same activity retries them without re-applying the local effect.
    pub async fn deliver(
        &self,
        activity: ProtocolObject,
        inboxes: &[String],
    ) -> Result<OutboundReport> {
        if !activity.kind().is_activity() {
            return Err(FederationError::InvalidItem(format!(
                "only activities are delivered, got {}",
                activity.kind()
            )));
        }

        // Nothing leaves the instance unless the local handler accepts it.
        self.dispatcher.check(&activity, Direction::Outbound).await?;

        let mut targets: Vec<&str> = Vec::with_capacity(inboxes.len());
        for inbox in inboxes.iter().map(|inbox| inbox.trim()) {
            if !inbox.is_empty() && !targets.contains(&inbox) {
                targets.push(inbox);
            }
        }

        let activity_id = activity.id().clone();
        with_db(&self.db, |db| {
            for inbox in &targets {
                db.record_delivery_pending(&activity_id, inbox)?;
            }
            Ok(())
        })?;

        let timeout = self.config.timeout;
        let posts: Vec<_> = targets
            .iter()
            .copied()
            .map(|inbox| {
                let transport = Arc::clone(&self.transport);
                let activity = &activity;
                async move {
                    let post = transport.post_activity(inbox, activity);
                    let outcome = tokio::time::timeout(timeout, post)
                        .await
                        .unwrap_or(Err(FederationError::Timeout(timeout)));
                    (inbox, outcome)
                }
            })
            .collect();
        let outcomes: Vec<(&str, Result<()>)> = stream::iter(posts)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (inbox, outcome) in outcomes {
            let error = outcome.err().map(|e| e.to_string());
            with_db(&self.db, |db| {
                db.record_delivery_result(&activity_id, inbox, error.as_deref())
            })?;
            match error {
                None => delivered.push(inbox.to_string()),
                Some(reason) => {
                    warn!(activity = %activity_id, inbox, error = %reason, "Delivery failed");
                    failed.push((inbox.to_string(), reason));
                }
            }
        }
        delivered.sort();
        failed.sort();

        let dispatch = self.dispatcher.dispatch(activity, Direction::Outbound).await?;

        info!(
            activity = %activity_id,
            delivered = delivered.len(),
            failed = failed.len(),
            persistence = ?dispatch.persistence,
            "Outbound activity delivered"
        );
        Ok(OutboundReport {
            activity_id,
            delivered,
            failed,
            dispatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use heraut_shared::{AccountId, TypeTag};
    use heraut_store::{Database, DeliveryState};

    use super::*;
    use crate::dispatcher::{ActivityOutcome, PersistOutcome};
    use crate::handlers::standard_registry;

    const ALICE: &str = "https://local.example/users/alice";
    const BOB: &str = "https://remote.example/users/bob";

    /// Records every POST; `down.` inboxes fail and `slow.` inboxes hang.
    #[derive(Default)]
    struct ScriptedTransport {
        posted: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn posted(&self) -> Vec<String> {
            let mut posted = self.posted.lock().unwrap().clone();
            posted.sort();
            posted
        }
    }

    #[async_trait]
    impl DeliveryTransport for ScriptedTransport {
        async fn post_activity(&self, inbox: &str, _activity: &ProtocolObject) -> Result<()> {
            self.posted.lock().unwrap().push(inbox.to_string());
            if inbox.contains("slow.") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if inbox.contains("down.") {
                return Err(FederationError::Transport("HTTP 503".to_string()));
            }
            Ok(())
        }
    }

    fn outbox() -> (Outbox, SharedDatabase, Arc<ScriptedTransport>) {
        let db = Database::open_in_memory().unwrap().into_shared();
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = Dispatcher::new(standard_registry(&db).unwrap());
        let outbox = Outbox::new(
            db.clone(),
            transport.clone(),
            dispatcher,
            OutboxConfig {
                concurrency: 4,
                timeout: Duration::from_millis(50),
            },
        );
        (outbox, db, transport)
    }

    fn follow() -> ProtocolObject {
        serde_json::from_value(json!({
            "id": "https://local.example/follows/1",
            "type": "Follow",
            "actor": ALICE,
            "object": BOB,
        }))
        .unwrap()
    }

    fn inboxes(list: &[&str]) -> Vec<String> {
        list.iter().map(|inbox| inbox.to_string()).collect()
    }

    #[tokio::test]
    async fn test_rejected_activity_is_never_posted() {
        let (outbox, db, transport) = outbox();
        let create: ProtocolObject = serde_json::from_value(json!({
            "id": "https://local.example/statuses/1/activity",
            "type": "Create",
            "actor": ALICE,
            "object": "https://local.example/statuses/1",
        }))
        .unwrap();
        let activity_id = create.id().clone();

        let err = outbox
            .deliver(create, &inboxes(&["https://remote.example/inbox"]))
            .await
            .unwrap_err();

        assert!(matches!(err, FederationError::InvalidItem(_)));
        assert!(transport.posted().is_empty());
        let db = db.lock().unwrap();
        assert!(db.list_deliveries(&activity_id).unwrap().is_empty());
        assert!(db.find_object(&activity_id, TypeTag::Create).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inboxes_are_trimmed_and_deduplicated() {
        let (outbox, _db, transport) = outbox();
        let targets = inboxes(&[
            " https://a.example/inbox ",
            "https://a.example/inbox",
            "",
            "https://b.example/inbox",
        ]);

        let report = outbox.deliver(follow(), &targets).await.unwrap();

        assert_eq!(
            transport.posted(),
            inboxes(&["https://a.example/inbox", "https://b.example/inbox"])
        );
        assert_eq!(report.delivered.len(), 2);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_failed_and_hanging_inboxes_are_recorded() {
        let (outbox, db, _transport) = outbox();
        let targets = inboxes(&[
            "https://slow.example/inbox",
            "https://a.example/inbox",
            "https://down.example/inbox",
        ]);

        let report = outbox.deliver(follow(), &targets).await.unwrap();

        assert_eq!(report.delivered, inboxes(&["https://a.example/inbox"]));
        let failed: Vec<&str> = report.failed.iter().map(|(inbox, _)| inbox.as_str()).collect();
        assert_eq!(failed, ["https://down.example/inbox", "https://slow.example/inbox"]);
        assert!(report.failed[1].1.contains("Timed out"));

        let deliveries = db.lock().unwrap().list_deliveries(&report.activity_id).unwrap();
        let states: Vec<(&str, DeliveryState)> = deliveries
            .iter()
            .map(|delivery| (delivery.inbox.as_str(), delivery.state))
            .collect();
        assert_eq!(
            states,
            [
                ("https://a.example/inbox", DeliveryState::Delivered),
                ("https://down.example/inbox", DeliveryState::Failed),
                ("https://slow.example/inbox", DeliveryState::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_does_not_reapply_local_effect() {
        let (outbox, db, transport) = outbox();
        let targets = inboxes(&["https://down.example/inbox"]);

        let first = outbox.deliver(follow(), &targets).await.unwrap();
        assert_eq!(first.dispatch.persistence, PersistOutcome::Created);
        assert_eq!(first.dispatch.activity, Some(ActivityOutcome::Applied));

        let second = outbox.deliver(follow(), &targets).await.unwrap();
        assert_eq!(second.dispatch.persistence, PersistOutcome::Duplicate);
        assert_eq!(second.dispatch.activity, Some(ActivityOutcome::AlreadyApplied));
        assert_eq!(transport.posted().len(), 2);

        let db = db.lock().unwrap();
        let deliveries = db.list_deliveries(&first.activity_id).unwrap();
        assert_eq!(deliveries[0].attempts, 2);
        assert_eq!(db.count_followers(&AccountId::from(BOB)).unwrap(), 1);
    }
}
