//! Permit lifetime negotiation.
//!
//! The caller asks for a relative duration; the permitter answers with an
//! absolute expiry. The two are related by the permitter's documented rule,
//! never by an echo of the request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a permitter turns a requested duration into an expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Negotiation {
    /// `now + min(duration, max_secs)`.
    Capped { max_secs: u64 },
    /// `now + secs`, whatever was requested.
    FixedWindow { secs: u64 },
}

impl Negotiation {
    /// Lifetime granted for a requested duration, before external caps.
    pub fn lifetime(&self, requested: Duration) -> Duration {
        match *self {
            Negotiation::Capped { max_secs } => requested.min(Duration::from_secs(max_secs)),
            Negotiation::FixedWindow { secs } => Duration::from_secs(secs),
        }
    }

    /// Authoritative expiry for a grant made at `now`.
    ///
    /// `not_after` is an external bound (an approved lifetime, a backend
    /// deadline) applied after the rule itself.
    pub fn expiry(
        &self,
        now: DateTime<Utc>,
        requested: Duration,
        not_after: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let expiry = add_saturating(now, self.lifetime(requested));
        match not_after {
            Some(cap) if cap < expiry => cap,
            _ => expiry,
        }
    }
}

impl fmt::Display for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Negotiation::Capped { max_secs } => write!(f, "now + min(duration, {max_secs}s)"),
            Negotiation::FixedWindow { secs } => write!(f, "now + {secs}s"),
        }
    }
}

/// `at + by`, pinned to the largest representable time on overflow.
pub fn add_saturating(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn capped_shortens_long_requests() {
        let rule = Negotiation::Capped { max_secs: 3600 };
        let expiry = rule.expiry(t0(), Duration::from_secs(10_000), None);
        assert_eq!(expiry, t0() + chrono::Duration::seconds(3600));
    }

    #[test]
    fn capped_keeps_short_requests() {
        let rule = Negotiation::Capped { max_secs: 3600 };
        let expiry = rule.expiry(t0(), Duration::from_secs(60), None);
        assert_eq!(expiry, t0() + chrono::Duration::seconds(60));
    }

    #[test]
    fn fixed_window_ignores_request() {
        let rule = Negotiation::FixedWindow { secs: 900 };
        assert_eq!(
            rule.expiry(t0(), Duration::ZERO, None),
            t0() + chrono::Duration::seconds(900)
        );
        assert_eq!(
            rule.expiry(t0(), Duration::from_secs(5), None),
            t0() + chrono::Duration::seconds(900)
        );
    }

    #[test]
    fn not_after_bounds_the_rule() {
        let rule = Negotiation::FixedWindow { secs: 900 };
        let cap = t0() + chrono::Duration::seconds(30);
        assert_eq!(rule.expiry(t0(), Duration::ZERO, Some(cap)), cap);
    }

    #[test]
    fn overflow_saturates() {
        let rule = Negotiation::Capped { max_secs: u64::MAX };
        let expiry = rule.expiry(t0(), Duration::MAX, None);
        assert_eq!(expiry, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn rule_parses_from_tagged_form() {
        let rule: Negotiation = serde_json::from_str(r#"{"rule":"capped","max_secs":60}"#).unwrap();
        assert_eq!(rule, Negotiation::Capped { max_secs: 60 });
    }

    proptest! {
        #[test]
        fn capped_never_exceeds_cap_or_request(max in 0u64..1_000_000, requested in 0u64..2_000_000) {
            let rule = Negotiation::Capped { max_secs: max };
            let expiry = rule.expiry(t0(), Duration::from_secs(requested), None);
            let granted = (expiry - t0()).num_seconds() as u64;
            prop_assert!(granted <= max);
            prop_assert!(granted <= requested);
            prop_assert_eq!(granted, max.min(requested));
        }
    }
}
