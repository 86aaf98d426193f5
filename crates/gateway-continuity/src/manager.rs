//! Conversation continuity manager.
//!
//! Tracks conversation history and decides when a request may chain onto the
//! provider's previous response. Chaining is only allowed for conversations
//! that already have history and were active within the recent-activity
//! window. A chained request carries `previous_response_id` and only the
//! messages after the last assistant turn.

use crate::state::{ContextComplexity, ConversationEntry, ConversationState};
use crate::store::{ConversationStore, InMemoryConversationStore};
use chrono::{DateTime, Utc};
use gateway_core::{ConversationId, CorrelationId, Role, UnifiedRequest, UnifiedResponse};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Continuity manager configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuityConfig {
    /// Maximum history entries kept per conversation
    pub max_history_length: usize,
    /// Entries older than this are dropped by cleanup
    pub max_history_age: Duration,
    /// Conversations tracked before least-recently-updated eviction
    pub max_concurrent_conversations: usize,
    /// A conversation updated within this window may chain
    pub recent_activity_window: Duration,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            max_history_length: 50,
            max_history_age: Duration::from_secs(24 * 60 * 60),
            max_concurrent_conversations: 10_000,
            recent_activity_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Outcome of preparing a request for an existing conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedRequest {
    /// Request to send upstream
    pub enhanced_request: UnifiedRequest,
    /// Response id the request chains onto
    pub previous_response_id: Option<String>,
    /// Complexity of the original request
    pub context_complexity: ContextComplexity,
    /// Whether server-side chaining is used
    pub should_use_previous_response: bool,
}

impl ProcessedRequest {
    /// The request as sent by the caller, without chaining
    #[must_use]
    pub fn unchained(request: &UnifiedRequest) -> Self {
        Self {
            enhanced_request: request.clone(),
            previous_response_id: request.previous_response_id.clone(),
            context_complexity: ContextComplexity::classify(request),
            should_use_previous_response: false,
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Conversation continuity manager
#[derive(Debug)]
pub struct ConversationManager {
    config: ContinuityConfig,
    store: Arc<dyn ConversationStore>,
}

impl ConversationManager {
    /// Create a manager over `store`
    #[must_use]
    pub fn new(config: ContinuityConfig, store: Arc<dyn ConversationStore>) -> Self {
        Self { config, store }
    }

    /// Create a manager over an in-process store
    #[must_use]
    pub fn in_memory(config: ContinuityConfig) -> Self {
        Self::new(config, Arc::new(InMemoryConversationStore::new()))
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &ContinuityConfig {
        &self.config
    }

    /// Number of tracked conversations
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.store.len()
    }

    /// Prepare a request, chaining onto the previous response when allowed
    pub fn process_request(
        &self,
        request: &UnifiedRequest,
        conversation_id: Option<&ConversationId>,
        correlation_id: &CorrelationId,
    ) -> ProcessedRequest {
        let context_complexity = ContextComplexity::classify(request);
        let unchanged = || ProcessedRequest::unchained(request);

        // An explicit id from the caller wins over tracked state
        if request.previous_response_id.is_some() {
            return unchanged();
        }
        let Some(conversation_id) = conversation_id else {
            return unchanged();
        };
        let Some(state) = self.store.get(conversation_id) else {
            debug!(
                correlation_id = %correlation_id,
                conversation_id = %conversation_id,
                "First turn of conversation"
            );
            return unchanged();
        };
        let Some(previous_response_id) = self.chainable_response(&state, Utc::now()) else {
            return unchanged();
        };

        let Some(trimmed) = messages_after_last_assistant(request) else {
            debug!(
                correlation_id = %correlation_id,
                conversation_id = %conversation_id,
                "No new messages after the last assistant turn, not chaining"
            );
            return unchanged();
        };

        debug!(
            correlation_id = %correlation_id,
            conversation_id = %conversation_id,
            previous_response_id = %previous_response_id,
            sent_messages = trimmed.messages.len(),
            original_messages = request.messages.len(),
            complexity = %context_complexity,
            "Chaining onto previous response"
        );

        let mut enhanced_request = trimmed;
        enhanced_request.previous_response_id = Some(previous_response_id.clone());
        ProcessedRequest {
            enhanced_request,
            previous_response_id: Some(previous_response_id),
            context_complexity,
            should_use_previous_response: true,
        }
    }

    /// Response id to chain onto, if the conversation is eligible at `now`
    fn chainable_response(&self, state: &ConversationState, now: DateTime<Utc>) -> Option<String> {
        let previous = state.last_response_id.clone()?;
        if state.history.is_empty() {
            return None;
        }
        let idle = now - state.last_updated;
        if idle > to_chrono(self.config.max_history_age) {
            return None;
        }
        (idle <= to_chrono(self.config.recent_activity_window)).then_some(previous)
    }

    /// Record a completed turn
    pub fn record_conversation_turn(
        &self,
        conversation_id: &ConversationId,
        request: &UnifiedRequest,
        response: &UnifiedResponse,
        response_time_ms: u64,
        correlation_id: &CorrelationId,
    ) {
        let entry = ConversationEntry::from_turn(
            conversation_id.clone(),
            correlation_id.clone(),
            request,
            response,
            response_time_ms,
        );
        self.add_to_conversation_history(entry);
    }

    /// Count a failed call against a tracked conversation
    pub fn record_conversation_error(&self, conversation_id: &ConversationId) -> bool {
        let found = self
            .store
            .update(conversation_id, &mut |state| state.metrics.error_count += 1);
        if !found {
            debug!(conversation_id = %conversation_id, "Error for untracked conversation");
        }
        found
    }

    /// Append an entry recorded outside the normal request/response cycle
    pub fn add_to_conversation_history(&self, entry: ConversationEntry) {
        let conversation_id = entry.conversation_id.clone();
        let correlation_id = entry.correlation_id.clone();
        let max_len = self.config.max_history_length;

        let mut entry = Some(entry);
        let mut trimmed = 0;
        let mut length = 0;
        self.store.upsert(&conversation_id, &mut |state| {
            if let Some(entry) = entry.take() {
                trimmed = state.push_entry(entry, max_len);
            }
            length = state.history.len();
        });

        debug!(
            correlation_id = %correlation_id,
            conversation_id = %conversation_id,
            history_length = length,
            trimmed,
            "Recorded conversation turn"
        );
        self.enforce_capacity();
    }

    /// History of a conversation, oldest first
    #[must_use]
    pub fn get_conversation_history(&self, conversation_id: &ConversationId) -> Vec<ConversationEntry> {
        self.store
            .get(conversation_id)
            .map(|state| state.history)
            .unwrap_or_default()
    }

    /// Snapshot of a conversation
    #[must_use]
    pub fn get_conversation_state(&self, conversation_id: &ConversationId) -> Option<ConversationState> {
        self.store.get(conversation_id)
    }

    /// Snapshot of an archived conversation
    #[must_use]
    pub fn get_archived_conversation(&self, conversation_id: &ConversationId) -> Option<ConversationState> {
        self.store.get_archived(conversation_id)
    }

    /// Drop expired history, either for one conversation or for all of them.
    ///
    /// Conversations whose history expires completely are dropped, then the
    /// least recently updated conversations are evicted while over capacity.
    /// Returns the number of history entries removed.
    pub fn cleanup_conversation_history(&self, conversation_id: Option<&ConversationId>) -> usize {
        let cutoff = Utc::now() - to_chrono(self.config.max_history_age);
        let mut removed = match conversation_id {
            Some(id) => self.cleanup_one(id, cutoff),
            None => self
                .store
                .ids()
                .iter()
                .map(|id| self.cleanup_one(id, cutoff))
                .sum(),
        };
        removed += self.enforce_capacity();

        if removed > 0 {
            info!(
                removed_entries = removed,
                conversations = self.store.len(),
                "Conversation cleanup completed"
            );
        }
        removed
    }

    fn cleanup_one(&self, id: &ConversationId, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        let mut expired = false;
        self.store.update(id, &mut |state| {
            let had_entries = !state.history.is_empty();
            removed = state.retain_since(cutoff);
            expired = had_entries && state.history.is_empty();
        });
        if expired {
            self.store.remove(id);
            debug!(conversation_id = %id, "Dropped expired conversation");
        }
        removed
    }

    /// Evict least recently updated conversations while over capacity.
    /// Returns the number of history entries evicted.
    fn enforce_capacity(&self) -> usize {
        let limit = self.config.max_concurrent_conversations;
        if self.store.len() <= limit {
            return 0;
        }

        let mut activity = self.store.activity();
        activity.sort_by_key(|(_, last_updated)| *last_updated);
        let excess = activity.len().saturating_sub(limit);

        let mut removed = 0;
        for (id, _) in activity.into_iter().take(excess) {
            if let Some(state) = self.store.remove(&id) {
                removed += state.history.len();
                debug!(conversation_id = %id, "Evicted least recently updated conversation");
            }
        }
        warn!(
            evicted = excess,
            limit,
            "Conversation capacity exceeded, evicted oldest conversations"
        );
        removed
    }

    /// Move a conversation out of the active set. Returns false if it was not tracked.
    pub fn archive_conversation(&self, conversation_id: &ConversationId) -> bool {
        match self.store.remove(conversation_id) {
            Some(mut state) => {
                state.archived_at = Some(Utc::now());
                info!(
                    conversation_id = %conversation_id,
                    turns = state.metrics.total_turns,
                    "Conversation archived"
                );
                self.store.archive(state);
                true
            }
            None => false,
        }
    }

    /// Drop all conversations, active and archived
    pub fn reset(&self) {
        self.store.clear();
    }

    /// Run the cleanup pass every `interval` until the handle is shut down
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> MaintenanceHandle {
        let (shutdown, mut signal) = watch::channel(false);
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = manager.cleanup_conversation_history(None);
                        debug!(removed_entries = removed, "Maintenance pass finished");
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Conversation maintenance stopped");
        });

        info!(interval_secs = interval.as_secs(), "Conversation maintenance started");
        MaintenanceHandle { shutdown, task }
    }
}

/// Copy of `request` holding only the messages after the last assistant turn.
/// `None` when nothing follows that turn.
fn messages_after_last_assistant(request: &UnifiedRequest) -> Option<UnifiedRequest> {
    let start = request
        .messages
        .iter()
        .rposition(|m| m.role == Role::Assistant)
        .map_or(0, |i| i + 1);
    if start >= request.messages.len() {
        return None;
    }
    let mut trimmed = request.clone();
    trimmed.messages.drain(..start);
    Some(trimmed)
}

/// Handle to the background maintenance task
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Conversation maintenance task failed");
        }
    }

    /// Whether the task has finished
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
