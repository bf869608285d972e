//! # heraut-federation
//!
//! The federation engine: a registry of per-type handlers and the
//! dispatcher that drives every object through validation, persistence,
//! activity application and events; the remote actor cache; fan-out of new
//! posts into home streams; and outbound delivery.

pub mod actor_cache;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod federation;
pub mod handler;
pub mod handlers;
pub mod locks;
pub mod mediator;
pub mod outbox;
pub mod registry;

mod db;

pub use actor_cache::{ActorCache, ActorCacheConfig, ActorFetcher, ActorProfile, FetchError};
pub use dispatcher::{
    ActivityOutcome, Direction, DispatchReport, DispatchState, Dispatcher, PersistOutcome,
};
pub use error::{FederationError, Result};
pub use fanout::{
    AccountDirectory, DeliveryReport, FanoutConfig, FanoutService, HomeStream, RecipientSet,
};
pub use federation::{Federation, FederationConfig};
pub use handler::ActivityPubHandler;
pub use mediator::Mediator;
pub use outbox::{DeliveryTransport, OutboundReport, Outbox, OutboxConfig};
pub use registry::{HandlerRegistry, RegistryError};
