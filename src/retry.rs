use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use rand::Rng;

use crate::error::TransportErrorKind;

#[derive(Clone, Debug)]
pub struct RetryDecision {
    pub attempt: usize,
    pub max_attempts: usize,
    pub method: Method,
    pub endpoint: String,
    pub status: Option<StatusCode>,
    pub transport_error_kind: Option<TransportErrorKind>,
}

pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, decision: &RetryDecision) -> bool;
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_backoff: Duration,
    max_backoff: Option<Duration>,
    jitter_ratio: f64,
    retryable_status_codes: BTreeSet<u16>,
    retryable_transport_error_kinds: BTreeSet<TransportErrorKind>,
    retry_classifier: Option<Arc<dyn RetryClassifier>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_backoff", &self.base_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field(
                "retryable_transport_error_kinds",
                &self.retryable_transport_error_kinds,
            )
            .field("retry_classifier", &self.retry_classifier.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self::standard().max_attempts(1)
    }

    pub fn standard() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
            base_backoff: crate::config::DEFAULT_RETRY_DELAY,
            max_backoff: None,
            jitter_ratio: 0.0,
            retryable_status_codes: default_retryable_status_codes(),
            retryable_transport_error_kinds: default_retryable_transport_error_kinds(),
            retry_classifier: None,
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff.max(self.base_backoff));
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn retryable_transport_error_kinds(
        mut self,
        kinds: impl IntoIterator<Item = TransportErrorKind>,
    ) -> Self {
        self.retryable_transport_error_kinds = kinds.into_iter().collect();
        self
    }

    pub fn retry_classifier(mut self, retry_classifier: Arc<dyn RetryClassifier>) -> Self {
        self.retry_classifier = Some(retry_classifier);
        self
    }

    pub(crate) fn configured_max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub(crate) fn has_attempts_left(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    pub(crate) fn should_retry_decision(&self, decision: &RetryDecision) -> bool {
        if !self.has_attempts_left(decision.attempt) {
            return false;
        }
        if let Some(retry_classifier) = &self.retry_classifier {
            return retry_classifier.should_retry(decision);
        }
        if let Some(status) = decision.status {
            return self.retryable_status_codes.contains(&status.as_u16());
        }
        if let Some(kind) = decision.transport_error_kind {
            return self.retryable_transport_error_kinds.contains(&kind);
        }
        false
    }

    /// Delay slept after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub(crate) fn backoff_for_retry(&self, attempt: usize) -> Duration {
        let capped_exponent = attempt.saturating_sub(1).min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let mut delay_ms = self.base_backoff.as_millis().saturating_mul(multiplier);
        if let Some(max_backoff) = self.max_backoff {
            delay_ms = delay_ms.min(max_backoff.as_millis());
        }
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as u128) as u64);
        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let mut high = backoff_ms.saturating_add(jitter_span).max(low);
        if let Some(max_backoff) = self.max_backoff {
            high = high.min(max_backoff.as_millis().min(u64::MAX as u128) as u64).max(low);
        }
        let sampled_ms = rand::rng().random_range(low..=high);
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

fn default_retryable_status_codes() -> BTreeSet<u16> {
    std::iter::once(408_u16)
        .chain(std::iter::once(429))
        .chain(500..=599)
        .collect()
}

fn default_retryable_transport_error_kinds() -> BTreeSet<TransportErrorKind> {
    [
        TransportErrorKind::Dns,
        TransportErrorKind::Connect,
        TransportErrorKind::Read,
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::{Method, StatusCode};

    use super::{RetryClassifier, RetryDecision, RetryPolicy};
    use crate::error::TransportErrorKind;

    fn decision(attempt: usize, status: Option<u16>) -> RetryDecision {
        RetryDecision {
            attempt,
            max_attempts: 3,
            method: Method::GET,
            endpoint: "/loans".to_owned(),
            status: status.map(|code| StatusCode::from_u16(code).expect("valid status")),
            transport_error_kind: None,
        }
    }

    #[test]
    fn retries_408_429_and_every_5xx_within_max_attempts() {
        let policy = RetryPolicy::standard();
        for status in [408, 429, 500, 502, 503, 504, 599] {
            assert!(policy.should_retry_decision(&decision(1, Some(status))), "{status}");
        }
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(!policy.should_retry_decision(&decision(1, Some(status))), "{status}");
        }
        assert!(policy.should_retry_decision(&decision(2, Some(503))));
        assert!(!policy.should_retry_decision(&decision(3, Some(503))));
    }

    #[test]
    fn network_kinds_retry_but_tls_and_other_do_not() {
        let policy = RetryPolicy::standard();
        let mut network = decision(1, None);
        network.transport_error_kind = Some(TransportErrorKind::Connect);
        assert!(policy.should_retry_decision(&network));

        let mut tls = decision(1, None);
        tls.transport_error_kind = Some(TransportErrorKind::Tls);
        assert!(!policy.should_retry_decision(&tls));

        assert!(!policy.should_retry_decision(&decision(1, None)));
    }

    #[test]
    fn backoff_doubles_from_base_delay() {
        let policy = RetryPolicy::standard().base_backoff(Duration::from_millis(100));
        assert_eq!(policy.backoff_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_retry(3), Duration::from_millis(400));
    }

    #[test]
    fn jittered_backoff_never_exceeds_configured_max_backoff() {
        let policy = RetryPolicy::standard()
            .base_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(120))
            .jitter_ratio(1.0);

        for _ in 0..256 {
            let backoff = policy.backoff_for_retry(3);
            assert!(backoff <= Duration::from_millis(120));
        }
    }

    #[test]
    fn classifier_overrides_status_rules_but_not_max_attempts() {
        struct RetryConflicts;

        impl RetryClassifier for RetryConflicts {
            fn should_retry(&self, decision: &RetryDecision) -> bool {
                decision.status == Some(StatusCode::CONFLICT)
            }
        }

        let policy = RetryPolicy::standard().retry_classifier(Arc::new(RetryConflicts));
        assert!(policy.should_retry_decision(&decision(1, Some(409))));
        assert!(!policy.should_retry_decision(&decision(1, Some(503))));
        assert!(!policy.should_retry_decision(&decision(3, Some(409))));
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        let policy = RetryPolicy::standard().max_attempts(0);
        assert_eq!(policy.configured_max_attempts(), 1);
        assert!(!RetryPolicy::disabled().has_attempts_left(1));
    }
}
