//! Land Definition (`spec.md` §4.3): the immutable, declarative registry of
//! actions, events, tick interval, access control and lifecycle hooks a
//! [`keeper::LandKeeper`] drives.

pub mod context;
pub mod error;
pub mod keeper;
pub mod op;

#[cfg(test)]
mod tests;

use crate::ids::PlayerId;
use crate::land::context::HandlerContext;
use crate::land::error::{HandlerError, LandError};
use crate::land::op::Effects;
use crate::state::{FieldDescriptor, StateSchema, validate_descriptors};
use std::collections::HashMap;
use std::time::Duration;

pub type ActionHandler<S> = Box<
    dyn Fn(&mut S, serde_json::Value, &mut HandlerContext) -> Result<(serde_json::Value, Effects), HandlerError>
        + Send
        + Sync,
>;

pub type EventHandler<S> =
    Box<dyn Fn(&mut S, serde_json::Value, &mut HandlerContext) -> Effects + Send + Sync>;

pub type TickHandler<S> = Box<dyn Fn(&mut S, &mut HandlerContext) -> Effects + Send + Sync>;

/// Registered metadata for one action type: its handler plus whatever the
/// codec layer needs to know its payload is well-formed before it reaches
/// the handler (validation itself is left to the handler — `spec.md` notes
/// payload/response schema without mandating a validation DSL).
pub struct ActionDefinition<S> {
    pub type_identifier: &'static str,
    pub handler: ActionHandler<S>,
}

pub struct ClientEventDefinition<S> {
    pub type_identifier: &'static str,
    pub handler: Option<EventHandler<S>>,
}

/// A server event type registered purely so the codec layer can resolve its
/// wire `typeIdentifier` — the payload itself is produced ad hoc by
/// handlers via [`op::ServerEventEnvelope`].
pub struct ServerEventDefinition {
    pub type_identifier: &'static str,
}

/// Outcome of the access-control predicate run on Join (`spec.md` §4.3).
pub enum JoinDecision {
    Allow,
    Deny(String),
    /// Admit the new session by first synthesizing a Leave for the oldest
    /// joined session (`spec.md` §8 boundary behavior).
    ReplaceOldest,
}

pub type CanJoinFn<S> = Box<
    dyn Fn(&JoinAttempt, &S) -> JoinDecision + Send + Sync,
>;

/// What the access-control predicate sees about an incoming Join.
pub struct JoinAttempt<'a> {
    pub requested_player_id: Option<&'a PlayerId>,
    pub device_id: Option<&'a str>,
    pub metadata: &'a HashMap<String, String>,
    pub currently_joined: usize,
}

pub type AfterCreateFn<S> = Box<dyn Fn(&mut S) + Send + Sync>;
pub type OnJoinFn<S> = Box<dyn Fn(&mut S, &mut HandlerContext) + Send + Sync>;
pub type OnLeaveFn<S> = Box<dyn Fn(&mut S, &mut HandlerContext) + Send + Sync>;
pub type AfterFinalizeFn<S> = Box<dyn Fn(&mut S, &mut HandlerContext) + Send + Sync>;

/// An immutable, declarative Land definition (`spec.md` §4.3). Built once
/// (typically at process start) and shared — via `Arc` — across however
/// many Land instances of this `landType` get created.
pub struct LandDefinition<S: StateSchema> {
    pub land_type: &'static str,
    pub tick_interval: Option<Duration>,
    pub max_players: Option<usize>,
    pub allow_public: bool,

    descriptors: Vec<FieldDescriptor<S>>,
    actions: HashMap<&'static str, ActionDefinition<S>>,
    client_events: HashMap<&'static str, ClientEventDefinition<S>>,
    server_events: HashMap<&'static str, ServerEventDefinition>,

    pub can_join: CanJoinFn<S>,
    pub after_create: Option<AfterCreateFn<S>>,
    pub on_join: Option<OnJoinFn<S>>,
    pub on_leave: Option<OnLeaveFn<S>>,
    pub after_finalize: Option<AfterFinalizeFn<S>>,
    pub tick_handler: Option<TickHandler<S>>,
}

/// Builds a [`LandDefinition`], validating the field descriptor table up
/// front so a malformed state schema fails at definition-build time
/// (`spec.md` §7: "fatal configuration errors ... fail at Land creation,
/// not at message time").
pub struct LandDefinitionBuilder<S: StateSchema> {
    land_type: &'static str,
    tick_interval: Option<Duration>,
    max_players: Option<usize>,
    allow_public: bool,
    actions: HashMap<&'static str, ActionDefinition<S>>,
    client_events: HashMap<&'static str, ClientEventDefinition<S>>,
    server_events: HashMap<&'static str, ServerEventDefinition>,
    can_join: CanJoinFn<S>,
    after_create: Option<AfterCreateFn<S>>,
    on_join: Option<OnJoinFn<S>>,
    on_leave: Option<OnLeaveFn<S>>,
    after_finalize: Option<AfterFinalizeFn<S>>,
    tick_handler: Option<TickHandler<S>>,
}

impl<S: StateSchema> LandDefinitionBuilder<S> {
    pub fn new(land_type: &'static str) -> Self {
        Self {
            land_type,
            tick_interval: None,
            max_players: None,
            allow_public: true,
            actions: HashMap::new(),
            client_events: HashMap::new(),
            server_events: HashMap::new(),
            can_join: Box::new(|_, _| JoinDecision::Allow),
            after_create: None,
            on_join: None,
            on_leave: None,
            after_finalize: None,
            tick_handler: None,
        }
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub fn max_players(mut self, max: usize) -> Self {
        self.max_players = Some(max);
        self
    }

    pub fn allow_public(mut self, allow: bool) -> Self {
        self.allow_public = allow;
        self
    }

    pub fn action(mut self, type_identifier: &'static str, handler: ActionHandler<S>) -> Self {
        self.actions.insert(
            type_identifier,
            ActionDefinition {
                type_identifier,
                handler,
            },
        );
        self
    }

    pub fn client_event(
        mut self,
        type_identifier: &'static str,
        handler: Option<EventHandler<S>>,
    ) -> Self {
        self.client_events.insert(
            type_identifier,
            ClientEventDefinition {
                type_identifier,
                handler,
            },
        );
        self
    }

    pub fn server_event(mut self, type_identifier: &'static str) -> Self {
        self.server_events
            .insert(type_identifier, ServerEventDefinition { type_identifier });
        self
    }

    pub fn can_join(mut self, f: CanJoinFn<S>) -> Self {
        self.can_join = f;
        self
    }

    pub fn after_create(mut self, f: AfterCreateFn<S>) -> Self {
        self.after_create = Some(f);
        self
    }

    pub fn on_join(mut self, f: OnJoinFn<S>) -> Self {
        self.on_join = Some(f);
        self
    }

    pub fn on_leave(mut self, f: OnLeaveFn<S>) -> Self {
        self.on_leave = Some(f);
        self
    }

    pub fn after_finalize(mut self, f: AfterFinalizeFn<S>) -> Self {
        self.after_finalize = Some(f);
        self
    }

    pub fn tick_handler(mut self, f: TickHandler<S>) -> Self {
        self.tick_handler = Some(f);
        self
    }

    pub fn build(self) -> Result<LandDefinition<S>, LandError> {
        if self.land_type.is_empty() {
            return Err(LandError::InvalidLandType);
        }
        let descriptors = S::field_descriptors();
        validate_descriptors(&descriptors)?;
        Ok(LandDefinition {
            land_type: self.land_type,
            tick_interval: self.tick_interval,
            max_players: self.max_players,
            allow_public: self.allow_public,
            descriptors,
            actions: self.actions,
            client_events: self.client_events,
            server_events: self.server_events,
            can_join: self.can_join,
            after_create: self.after_create,
            on_join: self.on_join,
            on_leave: self.on_leave,
            after_finalize: self.after_finalize,
            tick_handler: self.tick_handler,
        })
    }
}

impl<S: StateSchema> LandDefinition<S> {
    pub fn descriptors(&self) -> &[FieldDescriptor<S>] {
        &self.descriptors
    }

    /// A stable fingerprint of this definition's field shape, used by the
    /// reevaluation runner's `SCHEMA_MISMATCH` compatibility check
    /// (`spec.md` §4.7) — two builds with the same fields in the same
    /// declared order agree on this id regardless of handler contents.
    pub fn definition_id(&self) -> String {
        let mut fingerprint = String::from(self.land_type);
        for descriptor in &self.descriptors {
            fingerprint.push('|');
            fingerprint.push_str(descriptor.name);
            fingerprint.push(':');
            fingerprint.push_str(match descriptor.policy {
                crate::state::SyncPolicy::Broadcast => "broadcast",
                crate::state::SyncPolicy::PerPlayerSlice => "perPlayerSlice",
                crate::state::SyncPolicy::ServerOnly => "serverOnly",
                crate::state::SyncPolicy::Internal => "internal",
            });
        }
        format!("{:016x}", crate::hash::fnv1a64(fingerprint.as_bytes()))
    }

    pub fn action(&self, type_identifier: &str) -> Option<&ActionDefinition<S>> {
        self.actions.get(type_identifier)
    }

    pub fn client_event(&self, type_identifier: &str) -> Option<&ClientEventDefinition<S>> {
        self.client_events.get(type_identifier)
    }

    pub fn server_event_registered(&self, type_identifier: &str) -> bool {
        self.server_events.contains_key(type_identifier)
    }
}
