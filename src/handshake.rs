//! Connect handshake retry state.
//!
//! The gateway stages a connect request and waits for the thing to send it back with
//! source and destination swapped. Lost requests are resent with a doubling backoff
//! until [`RetryPolicy::max_attempts`] requests went out.

use crate::address::MacAddress;
use crate::clock::Deadline;
use crate::config::RetryPolicy;
use crate::pdu::{ConnectRequest, ManagementPdu};

/// What the initiator should do next.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// The current attempt is still within its backoff.
    Wait,
    /// Send the request again.
    Resend,
    /// Every attempt went unanswered.
    GiveUp,
}

/// Retry bookkeeping of one pending connect request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handshake {
    attempts: u8,
    backoff_ms: u32,
    retry: Deadline,
}

impl Handshake {
    /// State right after the first request was staged at `now`.
    pub fn start(now: u32, policy: &RetryPolicy) -> Self {
        Self {
            attempts: 1,
            backoff_ms: policy.initial_backoff_ms,
            retry: Deadline::new(now, policy.initial_backoff_ms),
        }
    }

    /// Requests sent so far.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Advances the retry timer.
    pub fn poll(&mut self, now: u32, policy: &RetryPolicy) -> Step {
        if !self.retry.is_expired(now) {
            return Step::Wait;
        }
        if self.attempts >= policy.max_attempts {
            return Step::GiveUp;
        }
        self.attempts += 1;
        self.backoff_ms = self
            .backoff_ms
            .saturating_mul(2)
            .min(policy.max_backoff_ms);
        self.retry = Deadline::new(now, self.backoff_ms);
        Step::Resend
    }
}

/// The connect request carried by `frame` when it is addressed to `own`.
pub fn connect_request_for(frame: &[u8], own: MacAddress) -> Option<ConnectRequest> {
    match ManagementPdu::decode(frame) {
        Ok(ManagementPdu::ConnectRequest(req)) if req.dst == own => Some(req),
        _ => None,
    }
}
