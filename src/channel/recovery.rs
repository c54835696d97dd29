//! Per-item retry policy
//!
//! The channel supervisor is the single retry authority. Each playout item
//! carries one `RetryState`; the policy maps a classified error onto the
//! next attempt (with backoff and header/URL adjustments) or abandons the
//! item.

use std::time::Duration;

use crate::errors::ErrorKind;

/// Exponential backoff is capped here
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Rate-limit backoff grows much faster and tolerates a higher cap
const RATE_LIMIT_BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Adjustments applied to the next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attempt {
    pub delay: Duration,
    /// Re-resolve the URL before retrying
    pub force_refresh: bool,
    /// Strip cookies from the transcoder invocation
    pub drop_cookies: bool,
    /// Strip all optional headers
    pub minimal_headers: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry(Attempt),
    /// Skip to the next item or filler
    Abandon,
}

/// Retry bookkeeping for one playout item.
#[derive(Debug, Default)]
pub struct RetryState {
    attempts: u32,
    refreshes: u32,
    rate_limit_attempts: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn backoff(n: u32) -> Duration {
        // 1s, 2s, 4s, ...
        let secs = 1u64 << n.min(6);
        Duration::from_secs(secs).min(BACKOFF_CAP)
    }

    fn rate_limit_backoff(n: u32) -> Duration {
        // 25s, 125s, ...
        let secs = 25u64.saturating_mul(5u64.saturating_pow(n));
        Duration::from_secs(secs).min(RATE_LIMIT_BACKOFF_CAP)
    }

    /// Decide the next move after a failure of the given kind.
    pub fn next_action(&mut self, kind: ErrorKind) -> RecoveryAction {
        if !kind.retryable() {
            return RecoveryAction::Abandon;
        }

        match kind {
            // Plain transient failures: up to three retries with exponential
            // backoff
            ErrorKind::Network | ErrorKind::Cdn | ErrorKind::Stream | ErrorKind::Unknown => {
                if self.attempts >= 3 {
                    return RecoveryAction::Abandon;
                }
                let attempt = Attempt {
                    delay: Self::backoff(self.attempts),
                    ..Attempt::default()
                };
                self.attempts += 1;
                RecoveryAction::Retry(attempt)
            }

            // Server-side 5xx: drop cookies first, then minimal headers,
            // then a fresh resolution (alternate CDN where the resolver has
            // one)
            ErrorKind::Http500 | ErrorKind::HttpOther => {
                let attempt = match self.attempts {
                    0 => Attempt {
                        delay: Self::backoff(0),
                        drop_cookies: true,
                        ..Attempt::default()
                    },
                    1 => Attempt {
                        delay: Self::backoff(1),
                        minimal_headers: true,
                        ..Attempt::default()
                    },
                    2 => Attempt {
                        delay: Self::backoff(2),
                        force_refresh: true,
                        ..Attempt::default()
                    },
                    _ => return RecoveryAction::Abandon,
                };
                self.attempts += 1;
                RecoveryAction::Retry(attempt)
            }

            // Credential problems: refresh and retry once
            ErrorKind::Http401 | ErrorKind::Auth => {
                if self.refreshes >= 1 {
                    return RecoveryAction::Abandon;
                }
                self.refreshes += 1;
                self.attempts += 1;
                RecoveryAction::Retry(Attempt {
                    force_refresh: true,
                    ..Attempt::default()
                })
            }

            // Expired signatures: force-refresh immediately; a second
            // expiry on the refreshed URL means the credentials themselves
            // are stale
            ErrorKind::Http403 | ErrorKind::Expiration => {
                if self.refreshes >= 2 {
                    return RecoveryAction::Abandon;
                }
                self.refreshes += 1;
                self.attempts += 1;
                RecoveryAction::Retry(Attempt {
                    force_refresh: true,
                    ..Attempt::default()
                })
            }

            // Rate limiting: much longer backoff, then a fresh resolution
            ErrorKind::RateLimit | ErrorKind::Http429 | ErrorKind::Http464 => {
                let attempt = match self.rate_limit_attempts {
                    0 | 1 => Attempt {
                        delay: Self::rate_limit_backoff(self.rate_limit_attempts),
                        ..Attempt::default()
                    },
                    2 => Attempt {
                        delay: Self::rate_limit_backoff(2),
                        force_refresh: true,
                        ..Attempt::default()
                    },
                    _ => return RecoveryAction::Abandon,
                };
                self.rate_limit_attempts += 1;
                self.attempts += 1;
                RecoveryAction::Retry(attempt)
            }

            // Non-retryable kinds never reach here
            ErrorKind::Permission | ErrorKind::Format | ErrorKind::Codec => RecoveryAction::Abandon,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Backoff ladders
    // =========================================================================

    #[test]
    fn test_network_errors_retry_three_times_with_backoff() {
        let mut state = RetryState::new();

        for expected_secs in [1, 2, 4] {
            match state.next_action(ErrorKind::Network) {
                RecoveryAction::Retry(attempt) => {
                    assert_eq!(attempt.delay, Duration::from_secs(expected_secs));
                    assert!(!attempt.force_refresh);
                }
                RecoveryAction::Abandon => panic!("expected retry"),
            }
        }
        assert_eq!(state.next_action(ErrorKind::Network), RecoveryAction::Abandon);
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(RetryState::backoff(20), Duration::from_secs(60));
        assert_eq!(RetryState::rate_limit_backoff(10), Duration::from_secs(300));
    }

    #[test]
    fn test_rate_limit_uses_times_five_ladder() {
        let mut state = RetryState::new();

        match state.next_action(ErrorKind::RateLimit) {
            RecoveryAction::Retry(a) => assert_eq!(a.delay, Duration::from_secs(25)),
            _ => panic!("expected retry"),
        }
        match state.next_action(ErrorKind::Http429) {
            RecoveryAction::Retry(a) => assert_eq!(a.delay, Duration::from_secs(125)),
            _ => panic!("expected retry"),
        }
        // Third attempt re-resolves for an alternate CDN
        match state.next_action(ErrorKind::Http464) {
            RecoveryAction::Retry(a) => assert!(a.force_refresh),
            _ => panic!("expected retry"),
        }
        assert_eq!(state.next_action(ErrorKind::RateLimit), RecoveryAction::Abandon);
    }

    // =========================================================================
    // Refresh-driven recovery
    // =========================================================================

    #[test]
    fn test_expiration_refreshes_immediately() {
        let mut state = RetryState::new();
        match state.next_action(ErrorKind::Expiration) {
            RecoveryAction::Retry(attempt) => {
                assert!(attempt.force_refresh);
                assert_eq!(attempt.delay, Duration::ZERO);
            }
            RecoveryAction::Abandon => panic!("expected retry"),
        }
    }

    #[test]
    fn test_auth_error_refreshes_only_once() {
        let mut state = RetryState::new();
        assert!(matches!(
            state.next_action(ErrorKind::Http401),
            RecoveryAction::Retry(a) if a.force_refresh
        ));
        assert_eq!(state.next_action(ErrorKind::Http401), RecoveryAction::Abandon);
    }

    #[test]
    fn test_http_5xx_strips_cookies_then_headers_then_refreshes() {
        let mut state = RetryState::new();

        match state.next_action(ErrorKind::Http500) {
            RecoveryAction::Retry(a) => {
                assert!(a.drop_cookies);
                assert!(!a.minimal_headers);
            }
            _ => panic!("expected retry"),
        }
        match state.next_action(ErrorKind::Http500) {
            RecoveryAction::Retry(a) => assert!(a.minimal_headers),
            _ => panic!("expected retry"),
        }
        match state.next_action(ErrorKind::Http500) {
            RecoveryAction::Retry(a) => assert!(a.force_refresh),
            _ => panic!("expected retry"),
        }
        assert_eq!(state.next_action(ErrorKind::Http500), RecoveryAction::Abandon);
    }

    // =========================================================================
    // Non-retryable kinds
    // =========================================================================

    #[test]
    fn test_permission_and_codec_abandon_immediately() {
        let mut state = RetryState::new();
        assert_eq!(state.next_action(ErrorKind::Permission), RecoveryAction::Abandon);
        assert_eq!(state.next_action(ErrorKind::Format), RecoveryAction::Abandon);
        assert_eq!(state.next_action(ErrorKind::Codec), RecoveryAction::Abandon);
        assert_eq!(state.attempts(), 0, "abandons must not consume attempts");
    }
}
