//! Reconnection state machine.
//!
//! `Connecting → Open → Closed(reason)`; `Closed(LoggedOut)` moves to the terminal
//! `Halted` phase, any other close asks for exactly one new connection.

use std::time::Duration;

use rand::Rng;

use crate::connection::{ConnectionState, DisconnectReason};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Zero disables backoff: reconnect immediately.
    pub base: Duration,
    pub max: Duration,
    /// 0 = unbounded.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            max_attempts: 0,
        }
    }

    /// Upper bound for the given 1-based attempt: `min(max, base * 2^(attempt-1))`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max.max(self.base))
    }

    /// Jittered delay drawn uniformly from `[ceiling/2, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let hi = ceiling.as_millis() as u64;
        let lo = hi / 2;
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Open,
    Closed(DisconnectReason),
    Halted,
}

/// What the runner should do after observing a state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Reconnect { attempt: u32, delay: Duration },
    Halt(HaltReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HaltReason {
    LoggedOut,
    AttemptsExhausted,
}

#[derive(Debug)]
pub struct Reconnector {
    policy: BackoffPolicy,
    phase: Phase,
    attempts: u32,
}

impl Reconnector {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            phase: Phase::Connecting,
            attempts: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_halted(&self) -> bool {
        self.phase == Phase::Halted
    }

    /// Consecutive reconnects since the last `Open`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called when the runner starts a new connection after a `Reconnect` decision.
    pub fn begin_attempt(&mut self) {
        if !self.is_halted() {
            self.phase = Phase::Connecting;
        }
    }

    pub fn observe(&mut self, state: ConnectionState) -> Option<Decision> {
        match (self.phase, state) {
            (Phase::Halted, _) => None,
            // Repeated close for the same connection: the decision was already made.
            (Phase::Closed(_), ConnectionState::Closed(_)) => None,
            (_, ConnectionState::Connecting) => {
                self.phase = Phase::Connecting;
                None
            }
            (_, ConnectionState::Open) => {
                self.phase = Phase::Open;
                self.attempts = 0;
                None
            }
            (_, ConnectionState::Closed(reason)) if reason.is_terminal() => {
                self.phase = Phase::Halted;
                Some(Decision::Halt(HaltReason::LoggedOut))
            }
            (_, ConnectionState::Closed(reason)) => {
                self.attempts = self.attempts.saturating_add(1);
                if self.policy.max_attempts > 0 && self.attempts > self.policy.max_attempts {
                    self.phase = Phase::Halted;
                    return Some(Decision::Halt(HaltReason::AttemptsExhausted));
                }
                self.phase = Phase::Closed(reason);
                Some(Decision::Reconnect {
                    attempt: self.attempts,
                    delay: self.policy.delay(self.attempts),
                })
            }
        }
    }
}
