//! Inbound / outbound object dispatch.
//!
//! Every object moves through the same stages:
//!
//! ```text
//! Received ──validate──▶ Validated ──persist──▶ Persisted ──apply──▶ ActivityApplied
//!     │                                             │                      │
//!     └──▶ Rejected                                 └───────── event ──────┴──▶ EventFired
//! ```
//!
//! Each stage is a distinct value, so a stage can only be built from the
//! one before it.  The whole lifecycle of one identity runs under that
//! identity's lock.  Objects returned by a handler's `event` are dispatched
//! afterwards as [`Direction::Local`] objects.

use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use heraut_shared::{ObjectId, ObjectRef, ProtocolObject, TypeTag};

use crate::error::{FederationError, Result};
use crate::handler::ActivityPubHandler;
use crate::locks::KeyedLocks;
use crate::mediator::Mediator;
use crate::registry::HandlerRegistry;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Where an object came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Received from a remote server.
    Inbound,
    /// Produced locally and sent to remote servers.
    Outbound,
    /// Derived locally from another object (notifications).
    Local,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Received,
    Validated,
    Rejected,
    Persisted,
    ActivityApplied,
    EventFired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    Created,
    Updated,
    /// The identity was already stored; nothing was written.
    Duplicate,
    /// Identity-less notification, discarded without error.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityOutcome {
    Applied,
    /// Re-delivery of a known activity; its effect is not applied twice.
    AlreadyApplied,
    /// The target is not embedded, not stored locally, and its type is
    /// ambiguous.
    TargetMissing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub id: ObjectId,
    pub kind: TypeTag,
    pub direction: Direction,
    pub trail: Vec<DispatchState>,
    pub persistence: PersistOutcome,
    /// `None` for non-activities and dropped objects.
    pub activity: Option<ActivityOutcome>,
    /// Derived objects that were dispatched and stored.
    pub emitted: Vec<ObjectId>,
}

impl DispatchReport {
    pub fn reached(&self, state: DispatchState) -> bool {
        self.trail.contains(&state)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Received {
    object: ProtocolObject,
    direction: Direction,
}

impl Received {
    pub fn new(object: ProtocolObject, direction: Direction) -> Self {
        Self { object, direction }
    }

    pub fn object(&self) -> &ProtocolObject {
        &self.object
    }
}

#[derive(Debug)]
pub struct Validated {
    object: ProtocolObject,
    direction: Direction,
}

impl Validated {
    pub fn object(&self) -> &ProtocolObject {
        &self.object
    }
}

#[derive(Debug)]
pub struct Persisted {
    object: ProtocolObject,
    direction: Direction,
    outcome: PersistOutcome,
}

impl Persisted {
    pub fn object(&self) -> &ProtocolObject {
        &self.object
    }

    pub fn outcome(&self) -> PersistOutcome {
        self.outcome
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    locks: Arc<KeyedLocks>,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            locks: KeyedLocks::new(),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Run only the validation stage: nothing is stored, applied or emitted.
    pub async fn check(&self, object: &ProtocolObject, direction: Direction) -> Result<()> {
        let handler = self.registry.handler_for(object.kind())?;
        validate_object(handler.as_ref(), object, direction).await
    }

    /// Run one object through its full lifecycle.
    pub fn dispatch(
        &self,
        object: ProtocolObject,
        direction: Direction,
    ) -> BoxFuture<'_, Result<DispatchReport>> {
        self.run(object, direction).boxed()
    }

    async fn run(&self, object: ProtocolObject, direction: Direction) -> Result<DispatchReport> {
        let id = object.id().clone();
        let kind = object.kind();
        let handler = Arc::clone(self.registry.handler_for(kind)?);

        let guard = if id.is_empty() {
            None
        } else {
            Some(self.locks.lock(&id).await)
        };

        let mut trail = vec![DispatchState::Received];
        let validated = match self
            .validate(handler.as_ref(), Received::new(object, direction))
            .await
        {
            Ok(validated) => validated,
            Err(e) => {
                warn!(
                    id = %id,
                    kind = %kind,
                    direction = %direction,
                    state = ?DispatchState::Rejected,
                    error = %e,
                    "Object rejected"
                );
                return Err(e);
            }
        };
        trail.push(DispatchState::Validated);

        let persisted = self.persist(handler.as_ref(), validated).await?;
        if persisted.outcome == PersistOutcome::Dropped {
            debug!(kind = %kind, direction = %direction, "Dropped object without identity");
            return Ok(DispatchReport {
                id,
                kind,
                direction,
                trail,
                persistence: PersistOutcome::Dropped,
                activity: None,
                emitted: Vec::new(),
            });
        }
        trail.push(DispatchState::Persisted);

        let activity = if kind.is_activity() {
            let outcome = self.apply(handler.as_ref(), &persisted).await?;
            if outcome == ActivityOutcome::Applied {
                trail.push(DispatchState::ActivityApplied);
            }
            Some(outcome)
        } else {
            None
        };

        let derived = match handler.event(persisted.object(), direction.as_str()).await {
            Ok(derived) => {
                trail.push(DispatchState::EventFired);
                derived
            }
            Err(e) => {
                warn!(id = %id, kind = %kind, error = %e, "Event hook failed");
                Vec::new()
            }
        };
        drop(guard);

        let mut emitted = Vec::new();
        for object in derived {
            let derived_id = object.id().clone();
            match self.dispatch(object, Direction::Local).await {
                Ok(report) if report.persistence != PersistOutcome::Dropped => {
                    emitted.push(derived_id)
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(id = %id, derived = %derived_id, error = %e, "Derived object failed")
                }
            }
        }

        info!(
            id = %id,
            kind = %kind,
            direction = %direction,
            persistence = ?persisted.outcome,
            activity = ?activity,
            emitted = emitted.len(),
            "Dispatched object"
        );

        Ok(DispatchReport {
            id,
            kind,
            direction,
            trail,
            persistence: persisted.outcome,
            activity,
            emitted,
        })
    }

    async fn validate(
        &self,
        handler: &dyn ActivityPubHandler,
        received: Received,
    ) -> Result<Validated> {
        let Received { object, direction } = received;
        let object = match direction {
            Direction::Inbound => object.without_local_attributes(),
            Direction::Outbound | Direction::Local => object,
        };
        validate_object(handler, &object, direction).await?;
        Ok(Validated { object, direction })
    }

    async fn persist(
        &self,
        handler: &dyn ActivityPubHandler,
        validated: Validated,
    ) -> Result<Persisted> {
        let Validated { object, direction } = validated;
        let id = object.id();

        if id.is_empty() {
            return Ok(Persisted {
                object,
                direction,
                outcome: PersistOutcome::Dropped,
            });
        }

        let outcome = match handler.get_item_by_id(id).await {
            Ok(_) if object.kind().is_activity() => PersistOutcome::Duplicate,
            Ok(_) => {
                handler.update(&object).await?;
                PersistOutcome::Updated
            }
            Err(FederationError::ItemNotFound(_)) => match handler.save(&object).await {
                Ok(()) => PersistOutcome::Created,
                Err(FederationError::ItemAlreadyExists(_)) => PersistOutcome::Duplicate,
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
        };

        debug!(id = %id, kind = %object.kind(), outcome = ?outcome, "Persisted object");
        Ok(Persisted {
            object,
            direction,
            outcome,
        })
    }

    async fn apply(
        &self,
        handler: &dyn ActivityPubHandler,
        persisted: &Persisted,
    ) -> Result<ActivityOutcome> {
        if persisted.outcome != PersistOutcome::Created {
            return Ok(ActivityOutcome::AlreadyApplied);
        }
        let activity = persisted.object();

        let target = match self.resolve_target(activity).await? {
            Some(target) => target,
            None => {
                warn!(
                    id = %activity.id(),
                    kind = %activity.kind(),
                    direction = %persisted.direction,
                    "Activity target is unknown; not applied"
                );
                return Ok(ActivityOutcome::TargetMissing);
            }
        };

        let mediator = Mediator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.locks),
            vec![activity.id().clone()],
        );
        if let Err(e) = handler.activity(&mediator, activity, &target).await {
            // Forget the activity so a retried delivery is applied afresh.
            if let Err(rollback) = handler.delete(activity).await {
                warn!(id = %activity.id(), error = %rollback, "Could not discard failed activity");
            }
            return Err(e);
        }
        Ok(ActivityOutcome::Applied)
    }

    async fn resolve_target(&self, activity: &ProtocolObject) -> Result<Option<ProtocolObject>> {
        match activity.target()? {
            None => Ok(None),
            Some(ObjectRef::Embedded(target)) => Ok(Some(*target)),
            Some(ObjectRef::Reference(id)) => {
                let candidates = activity.kind().target_candidates();
                match self.registry.locate(&id, candidates).await? {
                    Some(found) => Ok(Some(found)),
                    // A single possible type needs no lookup to be addressed.
                    None => match candidates {
                        [only] => Ok(Some(ProtocolObject::reference(id, *only))),
                        _ => Ok(None),
                    },
                }
            }
        }
    }
}

async fn validate_object(
    handler: &dyn ActivityPubHandler,
    object: &ProtocolObject,
    direction: Direction,
) -> Result<()> {
    if object.kind().is_activity() {
        check_activity_shape(object)?;
    }
    match direction {
        Direction::Outbound => handler.process_result(object).await,
        Direction::Inbound | Direction::Local => handler.process_incoming_request(object).await,
    }
}

/// Structural checks shared by every activity type.
fn check_activity_shape(activity: &ProtocolObject) -> Result<()> {
    if activity.actor().is_none() {
        return Err(FederationError::InvalidItem(format!(
            "{} {} has no actor",
            activity.kind(),
            activity.id()
        )));
    }
    let target = activity.target()?.ok_or_else(|| {
        FederationError::InvalidItem(format!(
            "{} {} has no object",
            activity.kind(),
            activity.id()
        ))
    })?;
    if target.id() == activity.id() {
        return Err(FederationError::InvalidItem(format!(
            "{} targets itself",
            activity.id()
        )));
    }
    if let ObjectRef::Embedded(object) = &target {
        if !activity.kind().target_candidates().contains(&object.kind()) {
            return Err(FederationError::InvalidItem(format!(
                "{} cannot target a {}",
                activity.kind(),
                object.kind()
            )));
        }
    }
    Ok(())
}
