//! The engine facade the server talks to.
//!
//! [`Federation`] wires the standard handler registry, the dispatcher, the
//! actor cache, fan-out and the outbox over one shared database.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use heraut_shared::constants::{DEFAULT_DELIVERY_CONCURRENCY, DEFAULT_NETWORK_TIMEOUT_SECS};
use heraut_shared::{AccountId, ObjectId, ProtocolObject, Status, TypeTag, ATTR_ACTOR, ATTR_OBJECT};
use heraut_store::{Account, SharedDatabase};

use crate::actor_cache::{ActorCache, ActorCacheConfig, ActorFetcher};
use crate::db::with_db;
use crate::dispatcher::{Direction, DispatchReport, Dispatcher};
use crate::error::{FederationError, Result};
use crate::fanout::{DeliveryReport, FanoutConfig, FanoutService, StoreDirectory, StoreHomeStream};
use crate::handlers::{local_person, standard_registry};
use crate::outbox::{DeliveryTransport, OutboundReport, Outbox, OutboxConfig};

#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Public origin of this instance, e.g. `https://local.example`.
    pub base_url: String,
    /// Host part of the origin; mentions of this domain are local.
    pub local_domain: String,
    pub actor_cache: ActorCacheConfig,
    pub delivery_concurrency: usize,
    pub delivery_timeout: Duration,
}

impl FederationConfig {
    pub fn new(base_url: impl Into<String>, local_domain: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            local_domain: local_domain.into(),
            actor_cache: ActorCacheConfig::default(),
            delivery_concurrency: DEFAULT_DELIVERY_CONCURRENCY,
            delivery_timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
        }
    }
}

pub struct Federation {
    db: SharedDatabase,
    config: FederationConfig,
    dispatcher: Dispatcher,
    actors: ActorCache,
    fanout: FanoutService,
    outbox: Outbox,
}

impl Federation {
    pub fn new(
        db: SharedDatabase,
        fetcher: Arc<dyn ActorFetcher>,
        transport: Arc<dyn DeliveryTransport>,
        config: FederationConfig,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(standard_registry(&db)?);
        let actors = ActorCache::new(Arc::clone(&db), fetcher, config.actor_cache.clone());
        let fanout = FanoutService::new(
            Arc::new(StoreDirectory::new(Arc::clone(&db))),
            Arc::new(StoreHomeStream::new(Arc::clone(&db))),
            FanoutConfig {
                local_domain: config.local_domain.clone(),
                concurrency: config.delivery_concurrency,
                write_timeout: config.delivery_timeout,
            },
        );
        let outbox = Outbox::new(
            Arc::clone(&db),
            transport,
            dispatcher.clone(),
            OutboxConfig {
                concurrency: config.delivery_concurrency,
                timeout: config.delivery_timeout,
            },
        );

        info!(
            base_url = %config.base_url,
            domain = %config.local_domain,
            "Federation engine ready"
        );
        Ok(Self {
            db,
            config,
            dispatcher,
            actors,
            fanout,
            outbox,
        })
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn actors(&self) -> &ActorCache {
        &self.actors
    }

    pub fn fanout(&self) -> &FanoutService {
        &self.fanout
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    /// Actor URI of a local handle.
    pub fn actor_id(&self, handle: &str) -> AccountId {
        AccountId::new(format!("{}/users/{handle}", self.config.base_url))
    }

    /// Create (or refresh) a local account and its `Person` object.
    pub async fn register_local_account(&self, handle: &str) -> Result<AccountId> {
        let valid = !handle.is_empty()
            && handle
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(FederationError::InvalidItem(format!(
                "invalid handle {handle:?}"
            )));
        }

        let id = self.actor_id(handle);
        let person = local_person(
            id.to_object_id(),
            handle,
            &format!("{}/@{handle}", self.config.base_url),
            &format!("{id}/inbox"),
        );
        self.dispatcher.dispatch(person, Direction::Local).await?;
        Ok(id)
    }

    pub fn local_account(&self, handle: &str) -> Result<Account> {
        with_db(&self.db, |db| db.find_local_account_by_handle(handle))?
            .ok_or_else(|| FederationError::ItemNotFound(ObjectId::new(handle)))
    }

    // -----------------------------------------------------------------------
    // Traffic
    // -----------------------------------------------------------------------

    /// Handle an object POSTed to the shared inbox.
    pub async fn receive(&self, object: ProtocolObject) -> Result<DispatchReport> {
        self.dispatcher.dispatch(object, Direction::Inbound).await
    }

    /// Publish a post by a local account and fan it out to home streams.
    pub async fn post_status(&self, handle: &str, body: &str) -> Result<(Status, DeliveryReport)> {
        if body.trim().is_empty() {
            return Err(FederationError::InvalidItem("empty status".to_string()));
        }
        let author = self.local_account(handle)?;

        let id = ObjectId::new(format!("{}/statuses/{}", self.config.base_url, Uuid::new_v4()));
        let status = Status::new(id, author.id.clone(), body, true);
        let create_id = ObjectId::new(format!("{}/activity", status.id));
        let create = ProtocolObject::new(create_id, TypeTag::Create)
            .with_published(status.published)
            .with_attribute(ATTR_ACTOR, author.id.as_str())
            .with_attribute(ATTR_OBJECT, Value::Object(status.to_object().to_map()));
        self.dispatcher.dispatch(create, Direction::Local).await?;

        let report = self.fanout.deliver(&status).await?;
        Ok((status, report))
    }

    /// Send an activity authored by a local account to remote inboxes.
    pub async fn send(
        &self,
        handle: &str,
        activity: ProtocolObject,
        inboxes: &[String],
    ) -> Result<OutboundReport> {
        let author = self.local_account(handle)?;
        if activity.actor().as_ref() != Some(&author.id) {
            return Err(FederationError::InvalidItem(format!(
                "{} is not acting as {}",
                activity.id(),
                author.id
            )));
        }
        self.outbox.deliver(activity, inboxes).await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn home_timeline(&self, handle: &str, limit: u32) -> Result<Vec<Status>> {
        let account = self.local_account(handle)?;
        let notes = with_db(&self.db, |db| db.home_timeline(&account.id, limit))?;
        notes
            .iter()
            .map(|note| Status::from_object(note).map_err(FederationError::from))
            .collect()
    }

    pub fn notifications(&self, handle: &str, limit: u32) -> Result<Vec<ProtocolObject>> {
        let account = self.local_account(handle)?;
        with_db(&self.db, |db| db.list_notifications(&account.id, limit))
    }
}
