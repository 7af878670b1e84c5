//! Age-widened skill windows.
//!
//! ```text
//! window(t) = min(base_window + growth_per_sec * age_secs(t), max_window)
//! ```
//!
//! The window is never stored on the ticket. It is recomputed from the
//! submission timestamp on every pass, so it cannot drift.

use chrono::{DateTime, Utc};
use lobbymatch_types::{Ticket, WindowPolicy};
use rust_decimal::Decimal;

/// Current search window for a ticket submitted at `submitted_at`.
///
/// Age is measured at millisecond precision and clamped at zero.
#[must_use]
pub fn search_window(
    policy: &WindowPolicy,
    submitted_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Decimal {
    let elapsed_ms = (now - submitted_at).num_milliseconds().max(0);
    let elapsed_secs = Decimal::new(elapsed_ms, 3);
    policy
        .growth_per_sec
        .checked_mul(elapsed_secs)
        .and_then(|growth| policy.base_window.checked_add(growth))
        .map_or(policy.max_window, |window| window.min(policy.max_window))
}

/// Current search window of a ticket.
#[must_use]
pub fn ticket_window(policy: &WindowPolicy, ticket: &Ticket, now: DateTime<Utc>) -> Decimal {
    search_window(policy, ticket.submitted_at, now)
}

/// Whether `ticket` currently accepts `candidate`'s skill rating.
#[must_use]
pub fn accepts(policy: &WindowPolicy, ticket: &Ticket, candidate: &Ticket, now: DateTime<Utc>) -> bool {
    (ticket.skill_rating - candidate.skill_rating).abs() <= ticket_window(policy, ticket, now)
}

/// Symmetric acceptance: both tickets' windows must cover the gap.
#[must_use]
pub fn mutually_accept(policy: &WindowPolicy, a: &Ticket, b: &Ticket, now: DateTime<Utc>) -> bool {
    accepts(policy, a, b, now) && accepts(policy, b, a, now)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use lobbymatch_types::ShardKey;

    use super::*;

    fn policy() -> WindowPolicy {
        WindowPolicy {
            base_window: Decimal::new(50, 0),
            growth_per_sec: Decimal::new(5, 0),
            max_window: Decimal::new(500, 0),
        }
    }

    #[test]
    fn window_grows_linearly() {
        let t0 = Utc::now();
        assert_eq!(search_window(&policy(), t0, t0), Decimal::new(50, 0));
        assert_eq!(
            search_window(&policy(), t0, t0 + Duration::seconds(2)),
            Decimal::new(60, 0)
        );
        assert_eq!(
            search_window(&policy(), t0, t0 + Duration::seconds(10)),
            Decimal::new(100, 0)
        );
        assert_eq!(
            search_window(&policy(), t0, t0 + Duration::milliseconds(1500)),
            Decimal::new(575, 1)
        );
    }

    #[test]
    fn window_is_capped() {
        let t0 = Utc::now();
        assert_eq!(
            search_window(&policy(), t0, t0 + Duration::hours(1)),
            Decimal::new(500, 0)
        );
    }

    #[test]
    fn future_submission_uses_base() {
        let t0 = Utc::now();
        assert_eq!(
            search_window(&policy(), t0 + Duration::seconds(5), t0),
            Decimal::new(50, 0)
        );
    }

    #[test]
    fn rating_1080_accepted_at_10s_not_at_2s() {
        let shard = ShardKey::new("casual", "eu-west");
        let t0 = Utc::now();
        let ticket = Ticket::dummy(&shard, 1000, t0);
        let candidate = Ticket::dummy(&shard, 1080, t0);
        assert!(!accepts(&policy(), &ticket, &candidate, t0 + Duration::seconds(2)));
        assert!(accepts(&policy(), &ticket, &candidate, t0 + Duration::seconds(10)));
    }

    #[test]
    fn acceptance_is_symmetric_check() {
        let shard = ShardKey::new("casual", "eu-west");
        let t0 = Utc::now();
        let old = Ticket::dummy(&shard, 1000, t0);
        let fresh = Ticket::dummy(&shard, 1080, t0 + Duration::seconds(10));
        let now = t0 + Duration::seconds(10);
        // The old ticket's window (100) covers the gap; the fresh one's (50) does not.
        assert!(accepts(&policy(), &old, &fresh, now));
        assert!(!mutually_accept(&policy(), &old, &fresh, now));
    }
}
