//! Performance aggregation from raw analytics events.

use crate::domain::{AnalyticsEvent, PerformanceMetrics};

pub const GAME_START: &str = "game_start";
pub const LEVEL_COMPLETE: &str = "level_complete";
pub const LEVEL_FAIL: &str = "level_fail";
pub const UNLOCK_PROMPT_SHOWN: &str = "unlock_prompt_shown";
pub const REWARDED_AD_COMPLETED: &str = "rewarded_ad_completed";

/// Level a player must clear to count toward the retention proxy
const RETENTION_LEVEL: u32 = 3;

/// Aggregate a job's events into rates
pub fn aggregate(events: &[AnalyticsEvent]) -> PerformanceMetrics {
    let count = |name: &str| events.iter().filter(|e| e.event_name == name).count() as u64;

    let game_starts = count(GAME_START);
    let level_completes = count(LEVEL_COMPLETE);
    let level_fails = count(LEVEL_FAIL);
    let ad_shown = count(UNLOCK_PROMPT_SHOWN);
    let ad_completed = count(REWARDED_AD_COMPLETED);
    let retained = events
        .iter()
        .filter(|e| e.event_name == LEVEL_COMPLETE && e.level.unwrap_or(0) >= RETENTION_LEVEL)
        .count() as f64;

    let starts = game_starts.max(1) as f64;
    PerformanceMetrics {
        total_events: events.len() as u64,
        game_starts,
        level_completes,
        level_fails,
        ad_shown,
        ad_completed,
        completion_rate: level_completes as f64 / starts,
        fail_rate: level_fails as f64 / (level_completes + level_fails).max(1) as f64,
        ad_opt_in_rate: if ad_shown > 0 {
            ad_completed as f64 / ad_shown as f64
        } else {
            0.0
        },
        retention_proxy: retained / starts,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn event(name: &str, level: Option<u32>) -> AnalyticsEvent {
        AnalyticsEvent {
            id: Uuid::new_v4(),
            job_id: Uuid::nil(),
            event_name: name.to_string(),
            level,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_events_yield_zero_rates() {
        let metrics = aggregate(&[]);
        assert_eq!(metrics, PerformanceMetrics::default());
    }

    #[test]
    fn test_rates() {
        let events = vec![
            event(GAME_START, None),
            event(GAME_START, None),
            event(LEVEL_COMPLETE, Some(1)),
            event(LEVEL_COMPLETE, Some(3)),
            event(LEVEL_FAIL, Some(4)),
            event(UNLOCK_PROMPT_SHOWN, Some(4)),
            event(UNLOCK_PROMPT_SHOWN, Some(4)),
            event(REWARDED_AD_COMPLETED, Some(4)),
        ];
        let metrics = aggregate(&events);

        assert_eq!(metrics.total_events, 8);
        assert!((metrics.completion_rate - 1.0).abs() < 1e-9);
        assert!((metrics.fail_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((metrics.ad_opt_in_rate - 0.5).abs() < 1e-9);
        assert!((metrics.retention_proxy - 0.5).abs() < 1e-9);
    }
}
