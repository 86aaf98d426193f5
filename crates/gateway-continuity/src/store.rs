//! Conversation storage.
//!
//! [`ConversationStore`] is the seam for swapping the in-process map for a
//! shared store. Every mutation of one conversation runs inside a single
//! per-key critical section; different conversations never contend on a
//! common lock.

use crate::state::ConversationState;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gateway_core::ConversationId;
use std::fmt::Debug;

/// Storage for active and archived conversations
pub trait ConversationStore: Send + Sync + Debug {
    /// Snapshot of one active conversation
    fn get(&self, id: &ConversationId) -> Option<ConversationState>;

    /// Mutate an active conversation, creating it first if missing
    fn upsert(&self, id: &ConversationId, apply: &mut dyn FnMut(&mut ConversationState));

    /// Mutate an active conversation if present. Returns whether it existed.
    fn update(&self, id: &ConversationId, apply: &mut dyn FnMut(&mut ConversationState)) -> bool;

    /// Remove an active conversation
    fn remove(&self, id: &ConversationId) -> Option<ConversationState>;

    /// Ids of all active conversations
    fn ids(&self) -> Vec<ConversationId>;

    /// Last activity of every active conversation
    fn activity(&self) -> Vec<(ConversationId, DateTime<Utc>)>;

    /// Number of active conversations
    fn len(&self) -> usize;

    /// Whether no conversation is active
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep an archived conversation
    fn archive(&self, state: ConversationState);

    /// Snapshot of an archived conversation
    fn get_archived(&self, id: &ConversationId) -> Option<ConversationState>;

    /// Drop everything
    fn clear(&self);
}

/// In-process store backed by sharded maps
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    active: DashMap<ConversationId, ConversationState>,
    archived: DashMap<ConversationId, ConversationState>,
}

impl InMemoryConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn get(&self, id: &ConversationId) -> Option<ConversationState> {
        self.active.get(id).map(|entry| entry.value().clone())
    }

    fn upsert(&self, id: &ConversationId, apply: &mut dyn FnMut(&mut ConversationState)) {
        let mut entry = self
            .active
            .entry(id.clone())
            .or_insert_with(|| ConversationState::new(id.clone()));
        apply(entry.value_mut());
    }

    fn update(&self, id: &ConversationId, apply: &mut dyn FnMut(&mut ConversationState)) -> bool {
        match self.active.get_mut(id) {
            Some(mut entry) => {
                apply(entry.value_mut());
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: &ConversationId) -> Option<ConversationState> {
        self.active.remove(id).map(|(_, state)| state)
    }

    fn ids(&self) -> Vec<ConversationId> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    fn activity(&self) -> Vec<(ConversationId, DateTime<Utc>)> {
        self.active
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_updated))
            .collect()
    }

    fn len(&self) -> usize {
        self.active.len()
    }

    fn archive(&self, state: ConversationState) {
        self.archived.insert(state.conversation_id.clone(), state);
    }

    fn get_archived(&self, id: &ConversationId) -> Option<ConversationState> {
        self.archived.get(id).map(|entry| entry.value().clone())
    }

    fn clear(&self) {
        self.active.clear();
        self.archived.clear();
    }
}
