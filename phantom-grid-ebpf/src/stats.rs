/// Point-in-time copy of every Phantom Grid counter, read by the control
/// plane for reporting. Counters are monotonically non-decreasing for the
/// lifetime of the attached programs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Probes answered by the deception surface (mirage hits + redirects).
    pub attack_stats: u64,
    pub stealth_drops: u64,
    pub os_mutations: u64,
    pub spa_auth_success: u64,
    pub spa_auth_failed: u64,
    pub spa_replay_blocked: u64,
    pub egress_blocks: u64,
    /// DLP hits by pattern id (index 0 holds pattern 1).
    pub suspicious_patterns: [u64; 5],
}

impl StatsSnapshot {
    /// Hostile events observed since attach.
    pub fn hostile_total(&self) -> u64 {
        self.attack_stats + self.stealth_drops + self.spa_replay_blocked + self.egress_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostile_total_sums_the_hostile_counters() {
        let snapshot = StatsSnapshot {
            attack_stats: 3,
            stealth_drops: 2,
            spa_replay_blocked: 1,
            egress_blocks: 4,
            ..Default::default()
        };
        assert_eq!(snapshot.hostile_total(), 10);
    }
}
