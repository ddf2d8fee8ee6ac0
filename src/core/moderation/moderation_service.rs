// Automod engine - core business logic for content moderation.
//
// This service handles:
// - Running the content checks on each message
// - Strike escalation (warn -> timed mute -> kick)
// - The severe track (instant ban + lockdown), which never touches strikes
//
// NO Discord dependencies here - it returns a decision and the
// enforcement layer turns that into platform calls.

use super::moderation_models::{
    IncomingMessage, ModerationAction, ModerationDecision, ModerationLogEvent, ModerationRecord,
    PolicyViolation, ViolationKind,
};
use super::moderation_policy::{ConfigurationError, ModerationPolicy};
use super::policy_checks::detect_violation;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Storage error: {0}")]
    StorageError(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Trait for persisting per-user strike records.
#[async_trait]
pub trait StrikeStore: Send + Sync {
    /// Get a user's record in a guild, if they have ever been struck.
    async fn get_record(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<ModerationRecord>, ModerationError>;

    /// Insert or replace a user's record.
    async fn save_record(&self, record: &ModerationRecord) -> Result<(), ModerationError>;
}

// Lets the composition root pick a store at runtime.
#[async_trait]
impl<T: StrikeStore + ?Sized> StrikeStore for Box<T> {
    async fn get_record(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<ModerationRecord>, ModerationError> {
        (**self).get_record(user_id, guild_id).await
    }

    async fn save_record(&self, record: &ModerationRecord) -> Result<(), ModerationError> {
        (**self).save_record(record).await
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Evaluates messages against the policy and tracks strikes.
pub struct ModerationEngine<S: StrikeStore> {
    store: S,
    policy: ModerationPolicy,
    /// One lock per (guild, user) so overlapping evaluations can't double-count
    user_locks: DashMap<(u64, u64), Arc<Mutex<()>>>,
}

impl<S: StrikeStore> ModerationEngine<S> {
    /// Create an engine; fails if the policy is unusable.
    pub fn new(store: S, policy: ModerationPolicy) -> Result<Self, ConfigurationError> {
        Ok(Self {
            store,
            policy: policy.validated()?,
            user_locks: DashMap::new(),
        })
    }

    pub fn policy(&self) -> &ModerationPolicy {
        &self.policy
    }

    /// Evaluate a message. Never fails: storage problems degrade to "no action"
    /// plus an `EvaluationFailed` audit event.
    pub async fn evaluate(&self, message: &IncomingMessage) -> ModerationDecision {
        match self.try_evaluate(message).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    guild_id = message.guild_id,
                    user_id = message.author_id,
                    "Automod evaluation failed: {}",
                    e
                );
                ModerationDecision {
                    events: vec![ModerationLogEvent::EvaluationFailed {
                        guild_id: message.guild_id,
                        user_id: message.author_id,
                        error: e.to_string(),
                    }],
                    ..ModerationDecision::none()
                }
            }
        }
    }

    /// Evaluate a message, surfacing storage errors.
    pub async fn try_evaluate(
        &self,
        message: &IncomingMessage,
    ) -> Result<ModerationDecision, ModerationError> {
        if !self.policy.enabled || self.policy.is_bypassed(message.author_id) {
            return Ok(ModerationDecision::none());
        }

        let violation = detect_violation(&self.policy, message);
        if !violation.is_violation() {
            return Ok(ModerationDecision::none());
        }

        if violation.kind.is_severe() {
            self.severe_decision(message, violation).await
        } else {
            self.strike_decision(message, violation).await
        }
    }

    /// Severe track: ban + lockdown, strike count left alone.
    async fn severe_decision(
        &self,
        message: &IncomingMessage,
        violation: PolicyViolation,
    ) -> Result<ModerationDecision, ModerationError> {
        // The record is informational here, so a storage failure must not stop the ban.
        let record = match self
            .store
            .get_record(message.author_id, message.guild_id)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    guild_id = message.guild_id,
                    user_id = message.author_id,
                    "Could not load strike record for severe violation: {}",
                    e
                );
                None
            }
        }
        .unwrap_or_else(|| ModerationRecord::new(message.author_id, message.guild_id));

        let action = ModerationAction::InstantBan {
            reason: violation.kind.reason().to_string(),
        };

        Ok(self.decision(message, violation, action, record))
    }

    /// Minor track: add a strike and escalate on the new count.
    async fn strike_decision(
        &self,
        message: &IncomingMessage,
        violation: PolicyViolation,
    ) -> Result<ModerationDecision, ModerationError> {
        let key = (message.guild_id, message.author_id);
        let lock = self.user_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.record_strike(message, violation).await
        };
        drop(lock);

        // Only the map still holds it, so nobody is queued on this user.
        self.user_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Read-increment-escalate-save for one strike. Caller holds the user's lock.
    async fn record_strike(
        &self,
        message: &IncomingMessage,
        violation: PolicyViolation,
    ) -> Result<ModerationDecision, ModerationError> {
        let mut record = self
            .store
            .get_record(message.author_id, message.guild_id)
            .await?
            .unwrap_or_else(|| ModerationRecord::new(message.author_id, message.guild_id));

        record.strike_count = record.strike_count.saturating_add(1);
        record.last_violation = Some(Utc::now());
        record.last_kind = Some(violation.kind);

        let action = self.escalate(violation.kind, record.strike_count);
        if matches!(action, ModerationAction::Kick { .. }) {
            record.strike_count = 0;
        }

        self.store.save_record(&record).await?;

        tracing::info!(
            guild_id = message.guild_id,
            user_id = message.author_id,
            kind = %violation.kind,
            action = action.label(),
            strike_count = record.strike_count,
            "Automod strike recorded"
        );

        Ok(self.decision(message, violation, action, record))
    }

    /// Map a freshly incremented strike count to an action.
    fn escalate(&self, kind: ViolationKind, strike_count: u32) -> ModerationAction {
        let reason = kind.reason().to_string();

        if strike_count >= self.policy.kick_strikes {
            ModerationAction::Kick {
                reason: format!("{} ({} strikes)", reason, strike_count),
            }
        } else if strike_count >= self.policy.mute_strikes {
            ModerationAction::TimedMute {
                duration: self.policy.mute_duration(),
                reason,
                strike_count,
            }
        } else if strike_count >= self.policy.warn_strikes {
            ModerationAction::Warn {
                reason,
                strike_count,
            }
        } else {
            ModerationAction::DeleteOnly { reason }
        }
    }

    fn decision(
        &self,
        message: &IncomingMessage,
        violation: PolicyViolation,
        action: ModerationAction,
        record: ModerationRecord,
    ) -> ModerationDecision {
        let event = ModerationLogEvent::ViolationActioned {
            guild_id: message.guild_id,
            user_id: message.author_id,
            channel_id: message.message.channel_id,
            kind: violation.kind,
            action: action.clone(),
            strike_count: record.strike_count,
            evidence: violation.evidence_snippet.clone(),
        };

        ModerationDecision {
            violation,
            action,
            record: Some(record),
            delete_message: true,
            events: vec![event],
        }
    }

    fn user_lock(&self, key: (u64, u64)) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================
