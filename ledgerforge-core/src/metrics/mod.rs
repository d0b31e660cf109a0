//! Metrics for bootstrap observability
//!
//! Recorded through the `metrics` facade; with no recorder installed every
//! call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const ENROLLMENT_IDENTITIES: &str = "enrollment.identities";
pub const ENROLLMENT_FAILURES: &str = "enrollment.failures";
pub const CHANNEL_PEERS_JOINED: &str = "channel.peers.joined";
pub const CHANNEL_PEERS_FAILED: &str = "channel.peers.failed";
pub const PROPOSALS_SUCCESSFUL: &str = "proposals.successful";
pub const PROPOSALS_FAILED: &str = "proposals.failed";
pub const STEP_DURATION_MS: &str = "bootstrap.step.duration_ms";

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(ENROLLMENT_IDENTITIES, "Identities attached to organizations");
    describe_counter!(ENROLLMENT_FAILURES, "Organizations whose enrollment failed");

    describe_counter!(CHANNEL_PEERS_JOINED, "Peers that joined the channel");
    describe_counter!(CHANNEL_PEERS_FAILED, "Peers that failed to join the channel");

    describe_counter!(PROPOSALS_SUCCESSFUL, "Proposal responses classified successful");
    describe_counter!(PROPOSALS_FAILED, "Proposal responses classified failed");

    describe_histogram!(STEP_DURATION_MS, "Bootstrap step duration in milliseconds");
}

pub fn record_identity_enrolled(org: &str) {
    counter!(ENROLLMENT_IDENTITIES, "org" => org.to_string()).increment(1);
}

pub fn record_enrollment_failure(org: &str) {
    counter!(ENROLLMENT_FAILURES, "org" => org.to_string()).increment(1);
}

pub fn record_peer_join(channel: &str, joined: bool) {
    let name = if joined { CHANNEL_PEERS_JOINED } else { CHANNEL_PEERS_FAILED };
    counter!(name, "channel" => channel.to_string()).increment(1);
}

/// Record classified proposal counts for a lifecycle stage
pub fn record_proposals(stage: &'static str, successful: usize, failed: usize) {
    counter!(PROPOSALS_SUCCESSFUL, "stage" => stage).increment(successful as u64);
    counter!(PROPOSALS_FAILED, "stage" => stage).increment(failed as u64);
}

/// Timer for measuring step duration
pub struct Timer {
    step: &'static str,
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new(step: &'static str) -> Self {
        Self {
            step,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(STEP_DURATION_MS, "step" => self.step).record(elapsed_ms);
        elapsed_ms
    }
}
