//! Access traits for the state shared between the fast path and the control
//! plane.
//!
//! The kernel programs implement these over BPF maps; the test suite over
//! plain structs. Every operation is best-effort: a missing counter slot is
//! a no-op, and LRU-backed tables may silently evict, so callers must never
//! rely on presence.

use crate::dlp::Pattern;

/// Singleton 64-bit counters, one per map name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    AttackStats,
    StealthDrops,
    OsMutations,
    SpaAuthSuccess,
    SpaAuthFailed,
    SpaReplayBlocked,
    EgressBlocks,
}

/// Slots of the `spa_config` array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ConfigKey {
    TotpStepSecs = 0,
    TotpTolerance = 1,
    ReplayWindowSecs = 2,
    SpaMode = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayStatus {
    Fresh,
    Replayed,
}

/// Counter surface shared by both datapath programs.
pub trait Metrics {
    fn counter_inc(&mut self, counter: Counter);
}

/// Per-pattern DLP counters, owned by the egress program.
pub trait PatternMetrics: Metrics {
    fn pattern_inc(&mut self, pattern: Pattern);
}

/// Full ingress state surface: whitelist, anti-replay, config.
pub trait Tables: Metrics {
    /// Raw whitelist lookup; expiry checking is the caller's business.
    fn whitelist_get(&mut self, src_ip: u32) -> Option<u64>;

    fn whitelist_put(&mut self, src_ip: u32, expiry_ns: u64);

    fn whitelist_delete(&mut self, src_ip: u32);

    /// Admit or reject a signature prefix against the replay window, and
    /// record it as seen either way. Two CPUs racing the same prefix may
    /// both see `Fresh` once; the window is bounded by this single hop and
    /// accepted.
    fn replay_check_and_record(
        &mut self,
        sig_prefix: u64,
        now_ns: u64,
        window_ns: u64,
    ) -> ReplayStatus;

    fn config_get(&self, key: ConfigKey) -> Option<u32>;
}
