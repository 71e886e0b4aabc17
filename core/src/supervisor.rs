//! Reconnection policy for a single channel.
//!
//! The supervisor is a plain state machine. It decides *whether* and *when* to retry; the channel manager owns
//! the timers and the connections.

use std::time::Duration;
use strum::Display;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// `base * 2^attempt`, capped at `max_delay`. `attempt` counts from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Schedule reconnect attempt number `attempt` (1-based) after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted
    GiveUp { attempts: u32 },
    /// A retry is already pending, or the supervisor already gave up
    Ignore,
}

#[derive(Debug)]
pub struct ReconnectSupervisor {
    policy: BackoffPolicy,
    state: SupervisorState,
    attempt: u32,
    retry_scheduled: bool,
}

impl ReconnectSupervisor {
    pub fn new(policy: BackoffPolicy) -> Self { Self { policy, state: SupervisorState::Idle, attempt: 0, retry_scheduled: false } }

    pub fn state(&self) -> SupervisorState { self.state }
    pub fn attempt(&self) -> u32 { self.attempt }

    pub fn begin_connect(&mut self) {
        if self.state == SupervisorState::Idle {
            self.state = SupervisorState::Connecting;
        }
    }

    /// The backend confirmed the channel. Returns true when this ends a reconnect cycle.
    pub fn on_connected(&mut self) -> bool {
        let recovered = self.state == SupervisorState::Reconnecting;
        self.settle();
        recovered
    }

    /// A change event arrived. While reconnecting this proves connectivity even if the confirmation is late.
    pub fn on_event(&mut self) -> bool {
        if self.state != SupervisorState::Reconnecting {
            return false;
        }
        debug!("event arrived during reconnect attempt {}, treating channel as restored", self.attempt);
        self.settle();
        true
    }

    pub fn on_failure(&mut self) -> Decision {
        if self.state == SupervisorState::Failed || self.retry_scheduled {
            return Decision::Ignore;
        }
        if self.attempt >= self.policy.max_attempts {
            self.state = SupervisorState::Failed;
            return Decision::GiveUp { attempts: self.attempt };
        }
        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        self.state = SupervisorState::Reconnecting;
        self.retry_scheduled = true;
        Decision::Retry { attempt: self.attempt, delay }
    }

    /// The scheduled retry timer fired and a new attempt is in flight
    pub fn retry_started(&mut self) { self.retry_scheduled = false; }

    pub fn reset(&mut self) {
        self.state = SupervisorState::Idle;
        self.attempt = 0;
        self.retry_scheduled = false;
    }

    fn settle(&mut self) {
        self.state = SupervisorState::Connected;
        self.attempt = 0;
        self.retry_scheduled = false;
    }
}
