//! Bounded-time polling of eventually consistent backends.
//!
//! [`wait_until`] invokes a probe right away and then keeps sleeping and
//! re-probing until the probe reports [`Probe::Done`] or [`Probe::Absent`],
//! or until the policy deadline passes. Every call owns its own
//! poll state; nothing is shared between invocations.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::PotemkinError;
use crate::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_POLL_TIMEOUT_SECS};

/// What a single probe observed
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T, P = ()> {
    /// Not there yet; carries the partial state seen so far
    NotDone(P),
    Done(T),
    /// The watched resource is confirmed gone
    Absent,
}

/// How a successful poll ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Done(T),
    Absent,
}

impl<T> PollOutcome<T> {
    pub fn into_done(self) -> Option<T> {
        match self {
            PollOutcome::Done(value) => Some(value),
            PollOutcome::Absent => None,
        }
    }
}

#[derive(Debug)]
pub enum PollError<P> {
    Timeout {
        attempts: u32,
        elapsed: Duration,
        last_state: Option<P>,
    },
    /// Non-transient probe failure; polling stopped
    Probe(PotemkinError),
}

impl<P: fmt::Debug> fmt::Display for PollError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Timeout {
                attempts,
                elapsed,
                last_state,
            } => write!(
                f,
                "timed out after {attempts} attempts in {elapsed:?}; last state: {last_state:?}"
            ),
            PollError::Probe(error) => write!(f, "probe failed: {error}"),
        }
    }
}

impl<P: fmt::Debug> std::error::Error for PollError<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Probe(error) => Some(error),
            PollError::Timeout { .. } => None,
        }
    }
}

impl<P: fmt::Debug> From<PollError<P>> for PotemkinError {
    fn from(error: PollError<P>) -> Self {
        match error {
            PollError::Timeout {
                attempts,
                elapsed,
                last_state,
            } => PotemkinError::PollTimeout {
                attempts,
                elapsed,
                last_state: match last_state {
                    Some(state) => format!("{state:?}"),
                    None => "nothing observed".to_string(),
                },
            },
            PollError::Probe(error) => error,
        }
    }
}

/// Growth of the sleep between two probes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Exponential {
        multiplier: f64,
        max_interval: Duration,
    },
    /// Uniformly random between the base interval and the exponential delay
    ExponentialJitter {
        multiplier: f64,
        max_interval: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed
    }
}

impl Backoff {
    /// Delay before the probe following the `retry`-th failed one (0-based)
    pub fn delay(&self, interval: Duration, retry: u32) -> Duration {
        let base = interval.as_secs_f64();
        let delay_secs = match self {
            Backoff::Fixed => base,
            Backoff::Exponential {
                multiplier,
                max_interval,
            } => exponential(base, *multiplier, retry).min(max_interval.as_secs_f64()),
            Backoff::ExponentialJitter {
                multiplier,
                max_interval,
            } => {
                let capped = exponential(base, *multiplier, retry).min(max_interval.as_secs_f64());
                if capped <= base {
                    capped
                } else {
                    rand::thread_rng().gen_range(base..=capped)
                }
            }
        };

        // saturates at Duration::MAX when the exponent blows past any representable delay
        Duration::try_from_secs_f64(delay_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

fn exponential(base: f64, multiplier: f64, retry: u32) -> f64 {
    base * multiplier.powi(retry.min(i32::MAX as u32) as i32)
}

/// Time budget and pacing for one [`wait_until`] call
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        )
    }
}

impl PollPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            max_attempts: None,
            backoff: Backoff::Fixed,
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn exponential(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff = Backoff::Exponential {
            multiplier,
            max_interval,
        };
        self
    }

    pub fn validate(&self) -> Result<(), PotemkinError> {
        if self.interval.is_zero() {
            return Err(PotemkinError::InvalidConfig(
                "poll interval must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == Some(0) {
            return Err(PotemkinError::InvalidConfig(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        match &self.backoff {
            Backoff::Fixed => Ok(()),
            Backoff::Exponential { multiplier, .. }
            | Backoff::ExponentialJitter { multiplier, .. } => {
                if multiplier.is_nan() || *multiplier < 1.0 {
                    Err(PotemkinError::InvalidConfig(
                        "backoff multiplier must be at least 1.0".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

struct PollState<P> {
    started: Instant,
    /// `None` when the timeout reaches past what an `Instant` can hold
    deadline: Option<Instant>,
    interval: Duration,
    attempts: u32,
    last_state: Option<P>,
}

/// Poll `probe` until it settles or the policy runs out.
///
/// The first probe runs immediately. Transient probe errors
/// ([`PotemkinError::is_transient`]) use up an attempt and are retried on the
/// next schedule; any other error ends the loop. Sleeps are clamped to the
/// deadline so the last probe happens right when the budget expires.
pub async fn wait_until<T, P, F, Fut>(
    policy: &PollPolicy,
    mut probe: F,
) -> Result<PollOutcome<T>, PollError<P>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T, P>, PotemkinError>>,
    P: fmt::Debug,
{
    let started = Instant::now();
    let mut state = PollState {
        started,
        deadline: started.checked_add(policy.timeout),
        interval: policy.interval,
        attempts: 0,
        last_state: None,
    };

    loop {
        state.attempts += 1;

        match probe().await {
            Ok(Probe::Done(value)) => {
                log::debug!("Poll satisfied after {} attempt(s)", state.attempts);
                return Ok(PollOutcome::Done(value));
            }
            Ok(Probe::Absent) => {
                log::debug!("Poll confirmed absence after {} attempt(s)", state.attempts);
                return Ok(PollOutcome::Absent);
            }
            Ok(Probe::NotDone(partial)) => {
                log::debug!("Poll attempt {} not done: {partial:?}", state.attempts);
                state.last_state = Some(partial);
            }
            Err(e) if e.is_transient() => {
                log::warn!("Poll attempt {} failed, will retry: {e}", state.attempts);
            }
            Err(e) => return Err(PollError::Probe(e)),
        }

        let now = Instant::now();
        let out_of_attempts = policy
            .max_attempts
            .is_some_and(|max| state.attempts >= max);
        let expired = state.deadline.is_some_and(|deadline| now >= deadline);
        if expired || out_of_attempts {
            return Err(PollError::Timeout {
                attempts: state.attempts,
                elapsed: now - state.started,
                last_state: state.last_state,
            });
        }

        state.interval = policy.backoff.delay(policy.interval, state.attempts - 1);
        let pause = match state.deadline {
            Some(deadline) => state.interval.min(deadline - now),
            None => state.interval,
        };
        tokio::time::sleep(pause).await;
    }
}
