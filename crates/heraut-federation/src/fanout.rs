//! Fan-out of a freshly created post into home streams.
//!
//! Recipients are, in order and without repeats: the author, the author's
//! local followers (oldest follow first), then the local accounts mentioned
//! in the post (in text order).  Each recipient gets one write; writes run
//! concurrently up to a fixed bound and one failed write never blocks the
//! others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use heraut_shared::constants::{DEFAULT_DELIVERY_CONCURRENCY, DEFAULT_NETWORK_TIMEOUT_SECS};
use heraut_shared::{AccountId, ObjectId, Status};
use heraut_store::SharedDatabase;

use crate::db::with_db;
use crate::error::{FederationError, Result};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Local accounts following `author`, oldest follow first.
    async fn local_followers(&self, author: &AccountId) -> Result<Vec<AccountId>>;

    /// The local account with this username, if any.
    async fn find_local_account(&self, username: &str) -> Result<Option<AccountId>>;
}

#[async_trait]
pub trait HomeStream: Send + Sync {
    async fn add_to_home(&self, recipient: &AccountId, status: &Status) -> Result<()>;
}

/// [`AccountDirectory`] over the accounts and follows tables.
pub struct StoreDirectory {
    db: SharedDatabase,
}

impl StoreDirectory {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountDirectory for StoreDirectory {
    async fn local_followers(&self, author: &AccountId) -> Result<Vec<AccountId>> {
        with_db(&self.db, |db| db.list_local_followers(author))
    }

    async fn find_local_account(&self, username: &str) -> Result<Option<AccountId>> {
        let account = with_db(&self.db, |db| db.find_local_account_by_handle(username))?;
        Ok(account.map(|account| account.id))
    }
}

/// [`HomeStream`] over the home_streams table.
pub struct StoreHomeStream {
    db: SharedDatabase,
}

impl StoreHomeStream {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HomeStream for StoreHomeStream {
    async fn add_to_home(&self, recipient: &AccountId, status: &Status) -> Result<()> {
        let inserted = with_db(&self.db, |db| db.add_to_home(recipient, &status.id))?;
        if !inserted {
            debug!(recipient = %recipient, status = %status.id, "Already in home stream");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recipient set
// ---------------------------------------------------------------------------

/// Insertion-ordered set of recipients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    order: Vec<AccountId>,
    seen: HashSet<AccountId>,
}

impl RecipientSet {
    /// Append `recipient` unless already present. Returns whether it was
    /// added.
    pub fn push(&mut self, recipient: AccountId) -> bool {
        if self.seen.contains(&recipient) {
            return false;
        }
        self.seen.insert(recipient.clone());
        self.order.push(recipient);
        true
    }

    pub fn contains(&self, recipient: &AccountId) -> bool {
        self.seen.contains(recipient)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccountId> {
        self.order.iter()
    }

    pub fn as_slice(&self) -> &[AccountId] {
        &self.order
    }

    pub fn into_vec(self) -> Vec<AccountId> {
        self.order
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Domain of this instance; mentions of other domains are skipped.
    pub local_domain: String,
    /// Maximum home-stream writes in flight for one post.
    pub concurrency: usize,
    /// Deadline of a single home-stream write.
    pub write_timeout: Duration,
}

impl FanoutConfig {
    pub fn new(local_domain: impl Into<String>) -> Self {
        Self {
            local_domain: local_domain.into(),
            concurrency: DEFAULT_DELIVERY_CONCURRENCY,
            write_timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub status_id: ObjectId,
    /// Every recipient, in delivery order.
    pub recipients: Vec<AccountId>,
    pub delivered: Vec<AccountId>,
    /// Recipients whose write failed, with the reason.
    pub failed: Vec<(AccountId, String)>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct FanoutService {
    directory: Arc<dyn AccountDirectory>,
    home: Arc<dyn HomeStream>,
    config: FanoutConfig,
}

impl FanoutService {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        home: Arc<dyn HomeStream>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            directory,
            home,
            config,
        }
    }

    /// Who receives `status`, in delivery order.
    pub async fn recipients(&self, status: &Status) -> Result<RecipientSet> {
        if !status.local {
            return Err(FederationError::InvalidItem(format!(
                "status {} did not originate here",
                status.id
            )));
        }

        let mut recipients = RecipientSet::default();
        recipients.push(status.author.clone());

        for follower in self.directory.local_followers(&status.author).await? {
            recipients.push(follower);
        }

        for mention in &status.mentions {
            if !mention.is_local_to(&self.config.local_domain) {
                debug!(mention = %mention.to_handle(), "Skipping remote mention");
                continue;
            }
            match self.directory.find_local_account(&mention.username).await? {
                Some(account) => {
                    recipients.push(account);
                }
                None => debug!(mention = %mention.to_handle(), "Mentioned account does not exist"),
            }
        }

        Ok(recipients)
    }

    /// Write `status` into every recipient's home stream.
    pub async fn deliver(&self, status: &Status) -> Result<DeliveryReport> {
        let recipients = self.recipients(status).await?;
        let write_timeout = self.config.write_timeout;

        let outcomes: HashMap<AccountId, Result<()>> = stream::iter(recipients.iter().cloned())
            .map(|recipient| {
                let home = Arc::clone(&self.home);
                async move {
                    let write = home.add_to_home(&recipient, status);
                    let outcome = tokio::time::timeout(write_timeout, write)
                        .await
                        .unwrap_or(Err(FederationError::Timeout(write_timeout)));
                    (recipient, outcome)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut delivered = Vec::with_capacity(recipients.len());
        let mut failed = Vec::new();
        for recipient in recipients.iter() {
            match outcomes.get(recipient) {
                Some(Ok(())) => delivered.push(recipient.clone()),
                Some(Err(e)) => {
                    warn!(
                        status = %status.id,
                        recipient = %recipient,
                        error = %e,
                        "Home stream write failed"
                    );
                    failed.push((recipient.clone(), e.to_string()));
                }
                None => failed.push((recipient.clone(), "not attempted".to_string())),
            }
        }

        info!(
            status = %status.id,
            recipients = recipients.len(),
            delivered = delivered.len(),
            failed = failed.len(),
            "Fan-out complete"
        );

        Ok(DeliveryReport {
            status_id: status.id.clone(),
            recipients: recipients.into_vec(),
            delivered,
            failed,
        })
    }
}
