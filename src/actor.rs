//! The user on whose behalf a batch runs.

use serde::{Deserialize, Serialize};

/// Acting user, recorded on every ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: u64,
    pub name: String,
    /// Organisation the actor issues certificates for.
    pub training_partner: Option<String>,
}

impl Actor {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            training_partner: None,
        }
    }

    pub fn with_training_partner(mut self, partner: impl Into<String>) -> Self {
        self.training_partner = Some(partner.into());
        self
    }
}

/// Resolves the acting user. Authentication lives outside this crate.
pub trait ActorContext: Send + Sync {
    fn current(&self) -> Actor;
}

/// An [`ActorContext`] that always returns the same actor.
#[derive(Debug, Clone)]
pub struct StaticActor(pub Actor);

impl ActorContext for StaticActor {
    fn current(&self) -> Actor {
        self.0.clone()
    }
}
