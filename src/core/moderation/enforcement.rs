// Enforcement - turns a `ModerationDecision` into platform side effects.
//
// The gateway trait is the only thing that talks to the chat platform.
// Every side effect is attempted independently; a failure becomes an
// audit event and never stops the rest of the decision from running.
//
// Lockdowns: on a severe violation we snapshot the channels @everyone can
// currently write in, revoke send on them, and spawn a timer that restores
// exactly that snapshot later. Each lockdown carries its own id so a timer
// or an early lift can only ever touch the lockdown it belongs to.

use super::join_monitor::JoinSurge;
use super::moderation_models::{
    IncomingMessage, MessageRef, ModerationAction, ModerationDecision, ModerationLogEvent,
    SideEffect,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Missing permission: {0}")]
    PermissionDenied(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

// ============================================================================
// PORTS
// ============================================================================

/// Platform calls the enforcer needs.
#[async_trait]
pub trait ModerationGateway: Send + Sync + 'static {
    async fn delete_message(&self, guild_id: u64, message: MessageRef)
        -> Result<(), GatewayError>;

    /// Tell the author (in the channel) why their message was removed.
    async fn warn_user(
        &self,
        guild_id: u64,
        message: MessageRef,
        user_id: u64,
        reason: &str,
    ) -> Result<(), GatewayError>;

    /// Private message to a member, used for mute and kick notices.
    async fn direct_message(&self, user_id: u64, content: &str) -> Result<(), GatewayError>;

    async fn timeout_user(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: &str,
    ) -> Result<(), GatewayError>;

    async fn ban_user(&self, guild_id: u64, user_id: u64, reason: &str)
        -> Result<(), GatewayError>;

    async fn kick_user(&self, guild_id: u64, user_id: u64, reason: &str)
        -> Result<(), GatewayError>;

    /// Text channels where the default role can currently send messages.
    async fn open_text_channels(&self, guild_id: u64) -> Result<Vec<u64>, GatewayError>;

    async fn set_channel_send_permission(
        &self,
        guild_id: u64,
        channel_id: u64,
        allowed: bool,
        reason: &str,
    ) -> Result<(), GatewayError>;
}

/// Receives audit entries. Must not block.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: ModerationLogEvent);
}

const LOCK_REASON: &str = "AUTOMOD: Server lockdown due to raid attempt";
const UNLOCK_REASON: &str = "AUTOMOD: Server unlock - raid threat subsided";

// ============================================================================
// ENFORCER
// ============================================================================

struct ActiveLockdown {
    id: u64,
    channels: Vec<u64>,
    started_at: DateTime<Utc>,
    unlock_task: Option<JoinHandle<()>>,
}

/// Executes decisions and owns the lockdown timers.
pub struct Enforcer<G: ModerationGateway, A: AuditSink> {
    gateway: Arc<G>,
    audit: Arc<A>,
    lockdown_duration: Duration,
    /// Guild ID -> channels we locked and the pending unlock
    lockdowns: Arc<DashMap<u64, ActiveLockdown>>,
    next_lockdown_id: AtomicU64,
}

impl<G: ModerationGateway, A: AuditSink> Enforcer<G, A> {
    pub fn new(gateway: Arc<G>, audit: Arc<A>, lockdown_duration: Duration) -> Self {
        Self {
            gateway,
            audit,
            lockdown_duration,
            lockdowns: Arc::new(DashMap::new()),
            next_lockdown_id: AtomicU64::new(1),
        }
    }

    /// Run every side effect the decision asks for.
    pub async fn execute(&self, message: &IncomingMessage, decision: &ModerationDecision) {
        for event in &decision.events {
            self.audit.record(event.clone());
        }

        let guild_id = message.guild_id;
        let user_id = message.author_id;

        if decision.delete_message {
            let result = self.gateway.delete_message(guild_id, message.message).await;
            self.report(guild_id, Some(user_id), SideEffect::DeleteMessage, result);
        }

        match &decision.action {
            ModerationAction::None | ModerationAction::DeleteOnly { .. } => {}

            ModerationAction::Warn { reason, .. } => {
                let result = self
                    .gateway
                    .warn_user(guild_id, message.message, user_id, reason)
                    .await;
                self.report(guild_id, Some(user_id), SideEffect::WarnUser, result);
            }

            ModerationAction::TimedMute {
                duration, reason, ..
            } => {
                let result = self
                    .gateway
                    .timeout_user(guild_id, user_id, *duration, reason)
                    .await;
                let muted = result.is_ok();
                self.report(guild_id, Some(user_id), SideEffect::TimeoutUser, result);

                if muted {
                    let notice = format!(
                        "You have been automatically muted for {} minutes. {}\nPlease review the server rules.",
                        duration.as_secs().div_ceil(60),
                        reason
                    );
                    self.notify(guild_id, user_id, &notice).await;
                }
            }

            ModerationAction::Kick { reason } => {
                // Has to go out before the kick; afterwards we may share no server with them.
                let notice = format!("You have been removed from the server. {}", reason);
                self.notify(guild_id, user_id, &notice).await;

                let result = self.gateway.kick_user(guild_id, user_id, reason).await;
                self.report(guild_id, Some(user_id), SideEffect::KickUser, result);
            }

            ModerationAction::InstantBan { reason } => {
                let result = self.gateway.ban_user(guild_id, user_id, reason).await;
                self.report(guild_id, Some(user_id), SideEffect::BanUser, result);

                self.start_lockdown(guild_id, user_id).await;
            }
        }
    }

    /// React to a burst of joins: audit it and, if configured, lock the server.
    pub async fn handle_join_surge(&self, surge: &JoinSurge) -> Option<Vec<u64>> {
        tracing::warn!(
            guild_id = surge.guild_id,
            joins = surge.join_count,
            window_secs = surge.window.as_secs(),
            "Possible raid detected"
        );
        self.audit.record(surge.to_event());

        if surge.lock_down {
            self.start_lockdown(surge.guild_id, surge.trigger_user_id)
                .await
        } else {
            None
        }
    }

    /// Lock every open channel and schedule the unlock.
    ///
    /// Returns the channels that were locked, or `None` when the guild is
    /// already locked down (the first snapshot stays authoritative). If the
    /// lockdown is lifted while channels are still being locked, the ones
    /// already locked are restored before this returns.
    pub async fn start_lockdown(&self, guild_id: u64, trigger_user_id: u64) -> Option<Vec<u64>> {
        let id = self.next_lockdown_id.fetch_add(1, Ordering::Relaxed);

        // Reserve the slot first so two raids at once can't both snapshot.
        match self.lockdowns.entry(guild_id) {
            Entry::Occupied(_) => {
                tracing::info!(
                    guild_id,
                    trigger_user_id,
                    "Lockdown already active, keeping existing snapshot"
                );
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveLockdown {
                    id,
                    channels: Vec::new(),
                    started_at: Utc::now(),
                    unlock_task: None,
                });
            }
        }

        let open_channels = match self.gateway.open_text_channels(guild_id).await {
            Ok(channels) => channels,
            Err(e) => {
                self.report(
                    guild_id,
                    Some(trigger_user_id),
                    SideEffect::SnapshotChannels,
                    Err(e),
                );
                self.lockdowns
                    .remove_if(&guild_id, |_, active| active.id == id);
                return None;
            }
        };

        let mut locked = Vec::with_capacity(open_channels.len());
        for channel_id in open_channels {
            if !self.owns_lockdown(guild_id, id) {
                break;
            }
            let result = self
                .gateway
                .set_channel_send_permission(guild_id, channel_id, false, LOCK_REASON)
                .await;
            if result.is_ok() {
                locked.push(channel_id);
            }
            self.report(guild_id, None, SideEffect::LockChannel(channel_id), result);
        }

        // Publish the snapshot and arm the timer only if this lockdown still owns the slot.
        let published = match self.lockdowns.get_mut(&guild_id) {
            Some(mut active) if active.id == id => {
                active.channels = locked.clone();
                active.unlock_task = Some(self.spawn_unlock(guild_id, id));
                true
            }
            _ => false,
        };

        if !published {
            tracing::info!(
                guild_id,
                locked = locked.len(),
                "Lockdown lifted while starting, restoring channels now"
            );
            restore_channels(
                self.gateway.as_ref(),
                self.audit.as_ref(),
                guild_id,
                locked.clone(),
            )
            .await;
            return Some(locked);
        }

        tracing::warn!(
            guild_id,
            trigger_user_id,
            locked = locked.len(),
            "Server lockdown started"
        );
        self.audit.record(ModerationLogEvent::LockdownStarted {
            guild_id,
            trigger_user_id,
            channels: locked.clone(),
            duration: self.lockdown_duration,
        });

        Some(locked)
    }

    /// Cancel a pending unlock timer and restore the snapshot right away.
    pub async fn lift_lockdown(&self, guild_id: u64) -> Option<Vec<u64>> {
        let (_, active) = self.lockdowns.remove(&guild_id)?;
        if let Some(task) = active.unlock_task {
            task.abort();
        }

        tracing::info!(
            guild_id,
            locked_for_secs = (Utc::now() - active.started_at).num_seconds(),
            "Lifting lockdown early"
        );

        let channels = active.channels.clone();
        restore_channels(
            self.gateway.as_ref(),
            self.audit.as_ref(),
            guild_id,
            active.channels,
        )
        .await;
        Some(channels)
    }

    /// Lift every active lockdown (used on shutdown).
    pub async fn lift_all(&self) {
        let guilds: Vec<u64> = self.lockdowns.iter().map(|entry| *entry.key()).collect();
        for guild_id in guilds {
            self.lift_lockdown(guild_id).await;
        }
    }

    pub fn is_locked_down(&self, guild_id: u64) -> bool {
        self.lockdowns.contains_key(&guild_id)
    }

    fn owns_lockdown(&self, guild_id: u64, id: u64) -> bool {
        self.lockdowns
            .get(&guild_id)
            .is_some_and(|active| active.id == id)
    }

    /// Timer that restores lockdown `id` after the configured delay. It only
    /// ever removes its own entry, never a later lockdown of the same guild.
    fn spawn_unlock(&self, guild_id: u64, id: u64) -> JoinHandle<()> {
        let gateway = Arc::clone(&self.gateway);
        let audit = Arc::clone(&self.audit);
        let lockdowns = Arc::clone(&self.lockdowns);
        let delay = self.lockdown_duration;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some((_, active)) = lockdowns.remove_if(&guild_id, |_, active| active.id == id)
            {
                restore_channels(gateway.as_ref(), audit.as_ref(), guild_id, active.channels)
                    .await;
            }
        })
    }

    async fn notify(&self, guild_id: u64, user_id: u64, notice: &str) {
        let result = self.gateway.direct_message(user_id, notice).await;
        self.report(guild_id, Some(user_id), SideEffect::NotifyUser, result);
    }

    fn report(
        &self,
        guild_id: u64,
        user_id: Option<u64>,
        effect: SideEffect,
        result: Result<(), GatewayError>,
    ) {
        report_failure(self.audit.as_ref(), guild_id, user_id, effect, result);
    }
}

async fn restore_channels<G: ModerationGateway, A: AuditSink>(
    gateway: &G,
    audit: &A,
    guild_id: u64,
    channels: Vec<u64>,
) {
    let mut restored = Vec::with_capacity(channels.len());
    for channel_id in channels {
        let result = gateway
            .set_channel_send_permission(guild_id, channel_id, true, UNLOCK_REASON)
            .await;
        if result.is_ok() {
            restored.push(channel_id);
        }
        report_failure(audit, guild_id, None, SideEffect::UnlockChannel(channel_id), result);
    }

    tracing::info!(guild_id, restored = restored.len(), "Server lockdown lifted");
    audit.record(ModerationLogEvent::LockdownLifted {
        guild_id,
        channels: restored,
    });
}

fn report_failure<A: AuditSink>(
    audit: &A,
    guild_id: u64,
    user_id: Option<u64>,
    effect: SideEffect,
    result: Result<(), GatewayError>,
) {
    if let Err(e) = result {
        tracing::warn!(guild_id, ?user_id, "Automod failed to {}: {}", effect, e);
        audit.record(ModerationLogEvent::SideEffectFailed {
            guild_id,
            user_id,
            effect,
            error: e.to_string(),
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{ModerationRecord, PolicyViolation, ViolationKind};
    use dashmap::DashSet;
    use std::sync::Mutex;

    /// Records every call; channels listed in `writable` start unlocked.
    #[derive(Default)]
    struct MockGateway {
        calls: Mutex<Vec<String>>,
        writable: DashSet<u64>,
        /// Channels we're not allowed to edit
        protected: DashSet<u64>,
        deny_ban: bool,
        deny_delete: bool,
        /// How long each permission edit takes
        edit_delay: Option<Duration>,
    }

    impl MockGateway {
        fn with_open_channels(open: &[u64]) -> Self {
            let gateway = Self::default();
            for id in open {
                gateway.writable.insert(*id);
            }
            gateway
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ModerationGateway for MockGateway {
        async fn delete_message(
            &self,
            _guild_id: u64,
            message: MessageRef,
        ) -> Result<(), GatewayError> {
            self.log(format!("delete {}", message.message_id));
            if self.deny_delete {
                return Err(GatewayError::PermissionDenied("MANAGE_MESSAGES".into()));
            }
            Ok(())
        }

        async fn warn_user(
            &self,
            _guild_id: u64,
            _message: MessageRef,
            user_id: u64,
            _reason: &str,
        ) -> Result<(), GatewayError> {
            self.log(format!("warn {}", user_id));
            Ok(())
        }

        async fn direct_message(&self, user_id: u64, _content: &str) -> Result<(), GatewayError> {
            self.log(format!("dm {}", user_id));
            Ok(())
        }

        async fn timeout_user(
            &self,
            _guild_id: u64,
            user_id: u64,
            duration: Duration,
            _reason: &str,
        ) -> Result<(), GatewayError> {
            self.log(format!("timeout {} {}", user_id, duration.as_secs()));
            Ok(())
        }

        async fn ban_user(
            &self,
            _guild_id: u64,
            user_id: u64,
            _reason: &str,
        ) -> Result<(), GatewayError> {
            self.log(format!("ban {}", user_id));
            if self.deny_ban {
                return Err(GatewayError::PermissionDenied("BAN_MEMBERS".into()));
            }
            Ok(())
        }

        async fn kick_user(
            &self,
            _guild_id: u64,
            user_id: u64,
            _reason: &str,
        ) -> Result<(), GatewayError> {
            self.log(format!("kick {}", user_id));
            Ok(())
        }

        async fn open_text_channels(&self, _guild_id: u64) -> Result<Vec<u64>, GatewayError> {
            let mut open: Vec<u64> = self.writable.iter().map(|c| *c).collect();
            open.sort_unstable();
            Ok(open)
        }

        async fn set_channel_send_permission(
            &self,
            _guild_id: u64,
            channel_id: u64,
            allowed: bool,
            _reason: &str,
        ) -> Result<(), GatewayError> {
            if let Some(delay) = self.edit_delay {
                tokio::time::sleep(delay).await;
            }
            if self.protected.contains(&channel_id) {
                return Err(GatewayError::PermissionDenied("MANAGE_ROLES".into()));
            }
            self.log(format!(
                "{} {}",
                if allowed { "unlock" } else { "lock" },
                channel_id
            ));
            if allowed {
                self.writable.insert(channel_id);
            } else {
                self.writable.remove(&channel_id);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockAudit {
        events: Mutex<Vec<ModerationLogEvent>>,
    }

    impl MockAudit {
        fn events(&self) -> Vec<ModerationLogEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl AuditSink for MockAudit {
        fn record(&self, event: ModerationLogEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    const GUILD: u64 = 10;
    const USER: u64 = 20;
    const LOCKDOWN: Duration = Duration::from_secs(300);

    fn message() -> IncomingMessage {
        IncomingMessage {
            guild_id: GUILD,
            author_id: USER,
            message: MessageRef {
                channel_id: 1,
                message_id: 99,
            },
            content: "x".into(),
            mentions: Vec::new(),
            embeds: Vec::new(),
            account_age: None,
            join_age: None,
            flagged_alt: false,
        }
    }

    fn decision(kind: ViolationKind, action: ModerationAction) -> ModerationDecision {
        ModerationDecision {
            violation: PolicyViolation::new(kind, "x"),
            action,
            record: Some(ModerationRecord::new(USER, GUILD)),
            delete_message: true,
            events: Vec::new(),
        }
    }

    fn ban() -> ModerationDecision {
        decision(
            ViolationKind::MassMention,
            ModerationAction::InstantBan {
                reason: "raid".into(),
            },
        )
    }

    fn enforcer(
        gateway: MockGateway,
    ) -> (
        Enforcer<MockGateway, MockAudit>,
        Arc<MockGateway>,
        Arc<MockAudit>,
    ) {
        let gateway = Arc::new(gateway);
        let audit = Arc::new(MockAudit::default());
        let enforcer = Enforcer::new(Arc::clone(&gateway), Arc::clone(&audit), LOCKDOWN);
        (enforcer, gateway, audit)
    }

    #[tokio::test]
    async fn test_warn_deletes_and_warns() {
        let (enforcer, gateway, _) = enforcer(MockGateway::default());

        let warn = decision(
            ViolationKind::BannedWord,
            ModerationAction::Warn {
                reason: "language".into(),
                strike_count: 1,
            },
        );
        enforcer.execute(&message(), &warn).await;

        assert_eq!(gateway.calls(), vec!["delete 99", "warn 20"]);
    }

    #[tokio::test]
    async fn test_timed_mute_uses_policy_duration() {
        let (enforcer, gateway, _) = enforcer(MockGateway::default());

        let mute = decision(
            ViolationKind::ExcessiveCaps,
            ModerationAction::TimedMute {
                duration: Duration::from_secs(900),
                reason: "caps".into(),
                strike_count: 3,
            },
        );
        enforcer.execute(&message(), &mute).await;

        assert_eq!(gateway.calls(), vec!["delete 99", "timeout 20 900", "dm 20"]);
    }

    #[tokio::test]
    async fn test_decision_events_reach_audit_sink() {
        let (enforcer, _, audit) = enforcer(MockGateway::default());

        let mut kick = decision(
            ViolationKind::BannedWord,
            ModerationAction::Kick {
                reason: "5 strikes".into(),
            },
        );
        kick.events.push(ModerationLogEvent::EvaluationFailed {
            guild_id: GUILD,
            user_id: USER,
            error: "marker".into(),
        });
        enforcer.execute(&message(), &kick).await;

        assert_eq!(audit.events(), kick.events);
    }

    #[tokio::test]
    async fn test_permission_errors_are_logged_not_fatal() {
        let gateway = MockGateway {
            deny_delete: true,
            ..Default::default()
        };
        let (enforcer, gateway, audit) = enforcer(gateway);

        let kick = decision(
            ViolationKind::BannedWord,
            ModerationAction::Kick {
                reason: "5 strikes".into(),
            },
        );
        enforcer.execute(&message(), &kick).await;

        // kick still attempted after the delete failed
        assert_eq!(gateway.calls(), vec!["delete 99", "dm 20", "kick 20"]);
        assert!(matches!(
            audit.events().as_slice(),
            [ModerationLogEvent::SideEffectFailed {
                effect: SideEffect::DeleteMessage,
                user_id: Some(USER),
                ..
            }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lockdown_restores_exact_snapshot() {
        // only 1-3 are open to @everyone
        let gateway = MockGateway::with_open_channels(&[1, 2, 3]);
        let (enforcer, gateway, audit) = enforcer(gateway);

        enforcer.execute(&message(), &ban()).await;

        assert!(enforcer.is_locked_down(GUILD));
        assert!(gateway.writable.is_empty());

        tokio::time::sleep(LOCKDOWN + Duration::from_secs(1)).await;

        assert!(!enforcer.is_locked_down(GUILD));
        let mut writable: Vec<u64> = gateway.writable.iter().map(|c| *c).collect();
        writable.sort_unstable();
        assert_eq!(writable, vec![1, 2, 3]);

        let unlocked: Vec<String> = gateway
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("unlock"))
            .collect();
        assert_eq!(unlocked, vec!["unlock 1", "unlock 2", "unlock 3"]);

        let events = audit.events();
        assert!(events.contains(&ModerationLogEvent::LockdownStarted {
            guild_id: GUILD,
            trigger_user_id: USER,
            channels: vec![1, 2, 3],
            duration: LOCKDOWN,
        }));
        assert!(events.contains(&ModerationLogEvent::LockdownLifted {
            guild_id: GUILD,
            channels: vec![1, 2, 3],
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_does_not_block_evaluation() {
        let gateway = MockGateway::with_open_channels(&[1]);
        let (enforcer, _, _) = enforcer(gateway);

        let started = tokio::time::Instant::now();
        enforcer.execute(&message(), &ban()).await;

        assert!(started.elapsed() < LOCKDOWN);
        assert!(enforcer.is_locked_down(GUILD));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lock_is_not_restored() {
        let gateway = MockGateway::with_open_channels(&[1, 2]);
        gateway.protected.insert(2);
        let (enforcer, gateway, audit) = enforcer(gateway);

        let locked = enforcer.start_lockdown(GUILD, USER).await.unwrap();
        assert_eq!(locked, vec![1]);

        tokio::time::sleep(LOCKDOWN + Duration::from_secs(1)).await;

        assert!(!gateway.calls().contains(&"unlock 2".to_string()));
        assert!(audit.events().iter().any(|e| matches!(
            e,
            ModerationLogEvent::SideEffectFailed {
                effect: SideEffect::LockChannel(2),
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_failure_still_locks_down() {
        let gateway = MockGateway {
            deny_ban: true,
            ..MockGateway::with_open_channels(&[7])
        };
        let (enforcer, gateway, audit) = enforcer(gateway);

        enforcer.execute(&message(), &ban()).await;

        assert!(gateway.calls().contains(&"lock 7".to_string()));
        assert!(audit.events().iter().any(|e| matches!(
            e,
            ModerationLogEvent::SideEffectFailed {
                effect: SideEffect::BanUser,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_raid_keeps_first_snapshot() {
        let gateway = MockGateway::with_open_channels(&[1, 2]);
        let (enforcer, gateway, _) = enforcer(gateway);

        assert_eq!(enforcer.start_lockdown(GUILD, USER).await, Some(vec![1, 2]));
        assert_eq!(enforcer.start_lockdown(GUILD, 21).await, None);

        tokio::time::sleep(LOCKDOWN + Duration::from_secs(1)).await;

        let mut writable: Vec<u64> = gateway.writable.iter().map(|c| *c).collect();
        writable.sort_unstable();
        assert_eq!(writable, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lift_lockdown_cancels_timer() {
        let gateway = MockGateway::with_open_channels(&[5]);
        let (enforcer, gateway, audit) = enforcer(gateway);

        enforcer.start_lockdown(GUILD, USER).await;
        assert_eq!(enforcer.lift_lockdown(GUILD).await, Some(vec![5]));
        assert!(gateway.writable.contains(&5));

        tokio::time::sleep(LOCKDOWN * 2).await;

        let unlocks = gateway
            .calls()
            .iter()
            .filter(|c| c.as_str() == "unlock 5")
            .count();
        assert_eq!(unlocks, 1);
        let lifted = audit
            .events()
            .iter()
            .filter(|e| matches!(e, ModerationLogEvent::LockdownLifted { .. }))
            .count();
        assert_eq!(lifted, 1);
        assert_eq!(enforcer.lift_lockdown(GUILD).await, None);
    }

    fn slow_gateway(open: &[u64]) -> MockGateway {
        MockGateway {
            edit_delay: Some(Duration::from_secs(1)),
            ..MockGateway::with_open_channels(open)
        }
    }

    fn sorted_writable(gateway: &MockGateway) -> Vec<u64> {
        let mut writable: Vec<u64> = gateway.writable.iter().map(|c| *c).collect();
        writable.sort_unstable();
        writable
    }

    #[tokio::test(start_paused = true)]
    async fn test_lift_while_locking_restores_everything() {
        let (enforcer, gateway, _) = enforcer(slow_gateway(&[1, 2, 3]));
        let enforcer = Arc::new(enforcer);

        let starting = {
            let enforcer = Arc::clone(&enforcer);
            tokio::spawn(async move { enforcer.start_lockdown(GUILD, USER).await })
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(enforcer.lift_lockdown(GUILD).await, Some(vec![]));

        // stops locking once lifted and gives back what it had locked
        assert_eq!(starting.await.unwrap(), Some(vec![1, 2]));
        assert!(!enforcer.is_locked_down(GUILD));

        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert_eq!(sorted_writable(&gateway), vec![1, 2, 3]);
        assert!(!gateway.calls().contains(&"lock 3".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_never_lifts_a_newer_lockdown() {
        let (enforcer, gateway, _) = enforcer(slow_gateway(&[1, 2, 3]));
        let enforcer = Arc::new(enforcer);

        let first = {
            let enforcer = Arc::clone(&enforcer);
            tokio::spawn(async move { enforcer.start_lockdown(GUILD, USER).await })
        };
        tokio::time::sleep(Duration::from_millis(1500)).await;
        enforcer.lift_lockdown(GUILD).await;
        first.await.unwrap();

        tokio::time::sleep(Duration::from_secs(100)).await;
        gateway.writable.insert(9);
        assert_eq!(
            enforcer.start_lockdown(GUILD, 21).await,
            Some(vec![1, 2, 3, 9])
        );

        // well past the first lockdown's deadline, still short of the second's
        tokio::time::sleep(LOCKDOWN - Duration::from_secs(60)).await;
        assert!(enforcer.is_locked_down(GUILD));
        assert!(!gateway.writable.contains(&9));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!enforcer.is_locked_down(GUILD));
        assert_eq!(sorted_writable(&gateway), vec![1, 2, 3, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_closed_before_raid_stay_closed() {
        // 4 is already closed to @everyone, so the gateway never reports it as open
        let (enforcer, gateway, audit) = enforcer(MockGateway::with_open_channels(&[1, 2]));

        enforcer.execute(&message(), &ban()).await;
        assert_eq!(enforcer.lift_lockdown(GUILD).await, Some(vec![1, 2]));

        let mut second = message();
        second.author_id = 21;
        enforcer.execute(&second, &ban()).await;
        tokio::time::sleep(LOCKDOWN + Duration::from_secs(1)).await;

        assert_eq!(sorted_writable(&gateway), vec![1, 2]);
        assert!(gateway.calls().iter().all(|c| !c.ends_with(" 4")));
        for event in audit.events() {
            if let ModerationLogEvent::LockdownLifted { channels, .. } = event {
                assert!(channels.iter().all(|c| [1, 2].contains(c)));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_surge_audits_and_optionally_locks() {
        let (enforcer, gateway, audit) = enforcer(MockGateway::with_open_channels(&[1]));

        let mut surge = JoinSurge {
            guild_id: GUILD,
            trigger_user_id: USER,
            join_count: 5,
            window: Duration::from_secs(60),
            lock_down: false,
        };
        assert_eq!(enforcer.handle_join_surge(&surge).await, None);
        assert!(gateway.writable.contains(&1));
        assert_eq!(audit.events(), vec![surge.to_event()]);

        surge.lock_down = true;
        assert_eq!(enforcer.handle_join_surge(&surge).await, Some(vec![1]));
        assert!(enforcer.is_locked_down(GUILD));
    }

    #[tokio::test]
    async fn test_mute_notice_skipped_when_timeout_fails() {
        struct NoTimeout(MockGateway);

        #[async_trait]
        impl ModerationGateway for NoTimeout {
            async fn delete_message(&self, g: u64, m: MessageRef) -> Result<(), GatewayError> {
                self.0.delete_message(g, m).await
            }
            async fn warn_user(
                &self,
                g: u64,
                m: MessageRef,
                u: u64,
                r: &str,
            ) -> Result<(), GatewayError> {
                self.0.warn_user(g, m, u, r).await
            }
            async fn direct_message(&self, u: u64, c: &str) -> Result<(), GatewayError> {
                self.0.direct_message(u, c).await
            }
            async fn timeout_user(
                &self,
                _g: u64,
                _u: u64,
                _d: Duration,
                _r: &str,
            ) -> Result<(), GatewayError> {
                Err(GatewayError::PermissionDenied("MODERATE_MEMBERS".into()))
            }
            async fn ban_user(&self, g: u64, u: u64, r: &str) -> Result<(), GatewayError> {
                self.0.ban_user(g, u, r).await
            }
            async fn kick_user(&self, g: u64, u: u64, r: &str) -> Result<(), GatewayError> {
                self.0.kick_user(g, u, r).await
            }
            async fn open_text_channels(&self, g: u64) -> Result<Vec<u64>, GatewayError> {
                self.0.open_text_channels(g).await
            }
            async fn set_channel_send_permission(
                &self,
                g: u64,
                c: u64,
                a: bool,
                r: &str,
            ) -> Result<(), GatewayError> {
                self.0.set_channel_send_permission(g, c, a, r).await
            }
        }

        let gateway = Arc::new(NoTimeout(MockGateway::default()));
        let audit = Arc::new(MockAudit::default());
        let enforcer = Enforcer::new(Arc::clone(&gateway), Arc::clone(&audit), LOCKDOWN);

        let mute = decision(
            ViolationKind::ExcessiveCaps,
            ModerationAction::TimedMute {
                duration: Duration::from_secs(600),
                reason: "caps".into(),
                strike_count: 3,
            },
        );
        enforcer.execute(&message(), &mute).await;

        assert_eq!(gateway.0.calls(), vec!["delete 99"]);
        assert!(matches!(
            audit.events().as_slice(),
            [ModerationLogEvent::SideEffectFailed {
                effect: SideEffect::TimeoutUser,
                ..
            }]
        ));
    }
}
