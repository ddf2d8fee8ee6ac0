// Join-rate monitor - flags a guild when too many members join too fast.
//
// Keeps a sliding window of recent join times per guild. Once the window
// holds `threshold` joins a `JoinSurge` is reported and the window starts
// over, so one burst raises one alert.

use super::moderation_models::ModerationLogEvent;
use super::moderation_policy::ModerationPolicy;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// A burst of joins large enough to look like a raid.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSurge {
    pub guild_id: u64,
    /// The member whose join tipped the window over
    pub trigger_user_id: u64,
    pub join_count: usize,
    pub window: Duration,
    /// Whether the server should be locked in response
    pub lock_down: bool,
}

impl JoinSurge {
    pub fn to_event(&self) -> ModerationLogEvent {
        ModerationLogEvent::RaidSuspected {
            guild_id: self.guild_id,
            trigger_user_id: self.trigger_user_id,
            join_count: self.join_count,
            window: self.window,
        }
    }
}

pub struct JoinRateMonitor {
    threshold: usize,
    window: Duration,
    lock_down: bool,
    /// Guild ID -> join times inside the window, oldest first
    recent_joins: DashMap<u64, VecDeque<Instant>>,
}

impl JoinRateMonitor {
    pub fn new(threshold: usize, window: Duration, lock_down: bool) -> Self {
        Self {
            threshold,
            window,
            lock_down,
            recent_joins: DashMap::new(),
        }
    }

    /// Disabled when automod is off or the threshold is 0.
    pub fn from_policy(policy: &ModerationPolicy) -> Self {
        let threshold = if policy.enabled {
            policy.join_raid_threshold
        } else {
            0
        };
        Self::new(threshold, policy.join_raid_window(), policy.join_raid_lockdown)
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }

    /// Record a join; returns a surge when the window is full.
    pub fn record_join(&self, guild_id: u64, user_id: u64) -> Option<JoinSurge> {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();
        let mut joins = self.recent_joins.entry(guild_id).or_default();
        while joins
            .front()
            .is_some_and(|joined| now.duration_since(*joined) > self.window)
        {
            joins.pop_front();
        }
        joins.push_back(now);

        if joins.len() < self.threshold {
            return None;
        }

        let join_count = joins.len();
        joins.clear();
        Some(JoinSurge {
            guild_id,
            trigger_user_id: user_id,
            join_count,
            window: self.window,
            lock_down: self.lock_down,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: u64 = 77;

    fn monitor() -> JoinRateMonitor {
        JoinRateMonitor::new(5, Duration::from_secs(60), false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifth_join_in_window_is_a_surge() {
        let monitor = monitor();

        for user in 1..5 {
            assert_eq!(monitor.record_join(GUILD, user), None);
            tokio::time::sleep(Duration::from_secs(10)).await;
        }

        let surge = monitor.record_join(GUILD, 5).unwrap();
        assert_eq!(surge.join_count, 5);
        assert_eq!(surge.trigger_user_id, 5);
        assert!(!surge.lock_down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_joins_fall_out_of_window() {
        let monitor = monitor();

        for user in 1..5 {
            monitor.record_join(GUILD, user);
        }
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(monitor.record_join(GUILD, 5), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_alert_per_burst() {
        let monitor = monitor();

        let surges = (1..=9)
            .filter_map(|user| monitor.record_join(GUILD, user))
            .count();
        assert_eq!(surges, 1);

        assert!(monitor.record_join(GUILD, 10).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guilds_are_counted_separately() {
        let monitor = monitor();

        for user in 1..5 {
            monitor.record_join(GUILD, user);
            monitor.record_join(GUILD + 1, user);
        }

        assert!(monitor.record_join(GUILD, 5).is_some());
        assert_eq!(monitor.record_join(GUILD + 1, 6), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_monitor_never_fires() {
        let policy = ModerationPolicy {
            enabled: false,
            ..Default::default()
        };
        let monitor = JoinRateMonitor::from_policy(&policy);

        assert!(!monitor.is_enabled());
        assert!((1..=20).all(|user| monitor.record_join(GUILD, user).is_none()));
    }

    #[test]
    fn test_surge_event_carries_window() {
        let surge = JoinSurge {
            guild_id: GUILD,
            trigger_user_id: 3,
            join_count: 5,
            window: Duration::from_secs(60),
            lock_down: true,
        };

        assert_eq!(
            surge.to_event(),
            ModerationLogEvent::RaidSuspected {
                guild_id: GUILD,
                trigger_user_id: 3,
                join_count: 5,
                window: Duration::from_secs(60),
            }
        );
    }
}
