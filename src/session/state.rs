//! Reconnect state machine
//!
//! Pure: it owns no resources and performs no I/O. Every input goes through
//! [`ReconnectMachine::handle`], which updates the phase and returns the
//! effects the controller must carry out, in order.

use serde::Serialize;
use std::time::Duration;

use crate::config::RetryConfig;

/// Terminal text when attempts run out while connecting
pub const CONNECT_FAILED_MESSAGE: &str = "Connection failed. Service may be unavailable.";

/// Terminal text when attempts run out after the session was live
pub const SERVICE_UNAVAILABLE_MESSAGE: &str =
    "The service is currently unavailable. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Connecting,
    Active,
    Retrying,
    Failed,
}

impl Phase {
    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Connecting | Phase::Active | Phase::Retrying)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// User start, including manual retry after `Failed`
    Start,
    /// Transport reported open
    Opened,
    /// Transport error or failed connect
    Failure,
    /// Remote close while connecting or live
    Closed,
    /// Backoff timer fired
    RetryElapsed,
    /// User stop
    Stop,
    /// Microphone or camera unavailable
    DeviceDenied(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Close the gate of the current generation
    Deactivate,
    /// Cancel the warm-up or backoff timer
    CancelTimer,
    /// Release devices, timers and the connection of the current generation
    TearDown,
    /// Forget the previous terminal error
    ClearError,
    /// Start a new generation after `delay`
    Connect { attempt: u32, delay: Duration },
    /// Open the gate and start media
    Activate,
    /// Arm the backoff timer
    ScheduleRetry { attempt: u32, delay: Duration },
    ReportFailure(String),
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    phase: Phase,
    attempt: u32,
    retry: RetryConfig,
}

impl ReconnectMachine {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            phase: Phase::Idle,
            attempt: 0,
            retry,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Reconnect attempts made since the last successful open
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        use Effect::*;

        match (self.phase, event) {
            (_, Event::Start) => {
                self.phase = Phase::Connecting;
                self.attempt = 0;
                vec![
                    Deactivate,
                    CancelTimer,
                    TearDown,
                    ClearError,
                    Connect {
                        attempt: 0,
                        delay: self.retry.warmup(),
                    },
                ]
            }

            (_, Event::Stop) => {
                self.phase = Phase::Idle;
                self.attempt = 0;
                vec![Deactivate, CancelTimer, TearDown, ClearError]
            }

            (Phase::Connecting, Event::Opened) => {
                self.phase = Phase::Active;
                self.attempt = 0;
                vec![Activate]
            }

            (from @ (Phase::Connecting | Phase::Active), Event::Failure | Event::Closed) => {
                let mut effects = vec![Deactivate, TearDown];
                if self.attempt < self.retry.max_retries {
                    self.attempt += 1;
                    self.phase = Phase::Retrying;
                    effects.push(ScheduleRetry {
                        attempt: self.attempt,
                        delay: self.retry.backoff(self.attempt),
                    });
                } else {
                    self.phase = Phase::Failed;
                    let message = if from == Phase::Active {
                        SERVICE_UNAVAILABLE_MESSAGE
                    } else {
                        CONNECT_FAILED_MESSAGE
                    };
                    effects.push(ReportFailure(message.to_string()));
                }
                effects
            }

            (Phase::Retrying, Event::RetryElapsed) => {
                self.phase = Phase::Connecting;
                vec![Connect {
                    attempt: self.attempt,
                    delay: Duration::ZERO,
                }]
            }

            (Phase::Connecting | Phase::Active, Event::DeviceDenied(message)) => {
                self.phase = Phase::Failed;
                vec![Deactivate, CancelTimer, TearDown, ReportFailure(message)]
            }

            // Anything else is stale for the current phase
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ReconnectMachine {
        ReconnectMachine::new(RetryConfig::default())
    }

    fn connects(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::Connect { .. }))
            .count()
    }

    #[test]
    fn start_warms_up_then_connects() {
        let mut m = machine();
        let effects = m.handle(Event::Start);
        assert_eq!(m.phase(), Phase::Connecting);
        assert_eq!(
            effects.last(),
            Some(&Effect::Connect {
                attempt: 0,
                delay: Duration::from_millis(200)
            })
        );
        assert_eq!(m.handle(Event::Opened), vec![Effect::Activate]);
        assert_eq!(m.phase(), Phase::Active);
    }

    #[test]
    fn retry_bound_is_three_then_failed() {
        let mut m = machine();
        let mut total_connects = connects(&m.handle(Event::Start));
        let mut delays = Vec::new();

        loop {
            let effects = m.handle(Event::Failure);
            if m.phase() == Phase::Failed {
                assert_eq!(
                    effects.last(),
                    Some(&Effect::ReportFailure(CONNECT_FAILED_MESSAGE.to_string()))
                );
                break;
            }
            for effect in &effects {
                if let Effect::ScheduleRetry { delay, .. } = effect {
                    delays.push(*delay);
                }
            }
            total_connects += connects(&m.handle(Event::RetryElapsed));
        }

        assert_eq!(total_connects, 4);
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6)
            ]
        );

        // No automatic attempts once failed
        assert!(m.handle(Event::RetryElapsed).is_empty());
        assert!(m.handle(Event::Failure).is_empty());
        assert_eq!(m.phase(), Phase::Failed);
    }

    #[test]
    fn open_resets_attempts() {
        let mut m = machine();
        m.handle(Event::Start);
        m.handle(Event::Failure);
        m.handle(Event::RetryElapsed);
        assert_eq!(m.attempt(), 1);
        m.handle(Event::Opened);
        assert_eq!(m.attempt(), 0);

        let effects = m.handle(Event::Closed);
        assert_eq!(m.phase(), Phase::Retrying);
        assert!(effects.contains(&Effect::ScheduleRetry {
            attempt: 1,
            delay: Duration::from_secs(2)
        }));
    }

    #[test]
    fn live_exhaustion_reports_unavailable() {
        let mut m = ReconnectMachine::new(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        });
        m.handle(Event::Start);
        m.handle(Event::Opened);
        let effects = m.handle(Event::Failure);
        assert_eq!(
            effects.last(),
            Some(&Effect::ReportFailure(SERVICE_UNAVAILABLE_MESSAGE.to_string()))
        );
    }

    #[test]
    fn stop_cancels_pending_retry() {
        let mut m = machine();
        m.handle(Event::Start);
        m.handle(Event::Failure);
        assert_eq!(m.phase(), Phase::Retrying);

        let effects = m.handle(Event::Stop);
        assert_eq!(effects[0], Effect::Deactivate);
        assert!(effects.contains(&Effect::CancelTimer));
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.handle(Event::RetryElapsed).is_empty());
    }

    #[test]
    fn device_denied_is_terminal_without_retry() {
        let mut m = machine();
        m.handle(Event::Start);
        let effects = m.handle(Event::DeviceDenied("camera blocked".into()));
        assert_eq!(m.phase(), Phase::Failed);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleRetry { .. })));

        // Manual retry is allowed
        m.handle(Event::Start);
        assert_eq!(m.phase(), Phase::Connecting);
    }

    #[test]
    fn stop_after_failure_clears_error() {
        let mut m = machine();
        m.handle(Event::Start);
        m.handle(Event::DeviceDenied("microphone blocked".into()));
        assert_eq!(m.phase(), Phase::Failed);

        let effects = m.handle(Event::Stop);
        assert_eq!(m.phase(), Phase::Idle);
        assert!(effects.contains(&Effect::ClearError));
    }

    #[test]
    fn every_teardown_closes_gate_first() {
        let mut m = machine();
        for event in [Event::Start, Event::Failure, Event::Stop] {
            let effects = m.handle(event);
            if let Some(pos) = effects.iter().position(|e| *e == Effect::TearDown) {
                let gate = effects.iter().position(|e| *e == Effect::Deactivate);
                assert!(gate.is_some_and(|g| g < pos));
            }
        }
    }
}
