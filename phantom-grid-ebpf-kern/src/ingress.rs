//! XDP ingress program: SPA gate, critical-port cloak, mirage decoys, and
//! stateless SYN redirection into the honeypot.
//!
//! All decisions live in `phantom-grid-ebpf-common::filter`; this program
//! adapts the XDP context and the BPF map catalog onto the shared core. The
//! map names below are the userspace contract — the loader and the control
//! plane look them up by these exact identifiers.
#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::{
    bindings::xdp_action,
    helpers::bpf_ktime_get_ns,
    macros::{map, xdp},
    maps::{Array, LruHashMap},
    programs::XdpContext,
};

use phantom_grid_ebpf_common::filter::{self, Verdict};
use phantom_grid_ebpf_common::tables::{ConfigKey, Counter, Metrics, ReplayStatus, Tables};

// ── Map catalog ──────────────────────────────────────────────────────────────

#[map]
#[allow(non_upper_case_globals)]
static attack_stats: Array<u64> = Array::with_max_entries(1, 0);

#[map]
#[allow(non_upper_case_globals)]
static stealth_drops: Array<u64> = Array::with_max_entries(1, 0);

#[map]
#[allow(non_upper_case_globals)]
static os_mutations: Array<u64> = Array::with_max_entries(1, 0);

#[map]
#[allow(non_upper_case_globals)]
static spa_auth_success: Array<u64> = Array::with_max_entries(1, 0);

#[map]
#[allow(non_upper_case_globals)]
static spa_auth_failed: Array<u64> = Array::with_max_entries(1, 0);

#[map]
#[allow(non_upper_case_globals)]
static spa_replay_blocked: Array<u64> = Array::with_max_entries(1, 0);

/// Source IP (big-endian numeric) → expiry in monotonic nanoseconds.
#[map]
#[allow(non_upper_case_globals)]
static spa_whitelist: LruHashMap<u32, u64> = LruHashMap::with_max_entries(100, 0);

/// First 8 signature bytes → first-seen monotonic nanoseconds.
#[map]
#[allow(non_upper_case_globals)]
static spa_replay_protection: LruHashMap<u64, u64> = LruHashMap::with_max_entries(1000, 0);

/// Secret material, populated and read by userspace only. This program does
/// no cryptography; the maps live here so they share the program's lifetime.
#[map]
#[allow(non_upper_case_globals)]
static spa_totp_secret: Array<u8> = Array::with_max_entries(32, 0);

#[map]
#[allow(non_upper_case_globals)]
static spa_hmac_secret: Array<u8> = Array::with_max_entries(32, 0);

/// TOTP step, TOTP tolerance, replay window seconds, active SPA mode.
#[map]
#[allow(non_upper_case_globals)]
static spa_config: Array<u32> = Array::with_max_entries(4, 0);

// ── Shared-table adapter ─────────────────────────────────────────────────────

struct KernTables;

impl KernTables {
    fn counter_map(counter: Counter) -> &'static Array<u64> {
        match counter {
            Counter::AttackStats => &attack_stats,
            Counter::StealthDrops => &stealth_drops,
            Counter::OsMutations => &os_mutations,
            Counter::SpaAuthSuccess => &spa_auth_success,
            Counter::SpaAuthFailed => &spa_auth_failed,
            Counter::SpaReplayBlocked => &spa_replay_blocked,
            // Owned by the egress program; unreachable on this path.
            Counter::EgressBlocks => &attack_stats,
        }
    }
}

impl Metrics for KernTables {
    fn counter_inc(&mut self, counter: Counter) {
        if let Some(ptr) = Self::counter_map(counter).get_ptr_mut(0) {
            let slot = unsafe { &*(ptr as *const AtomicU64) };
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Tables for KernTables {
    fn whitelist_get(&mut self, src_ip: u32) -> Option<u64> {
        let ptr = spa_whitelist.get_ptr(&src_ip)?;
        Some(unsafe { *ptr })
    }

    fn whitelist_put(&mut self, src_ip: u32, expiry_ns: u64) {
        let _ = spa_whitelist.insert(&src_ip, &expiry_ns, 0);
    }

    fn whitelist_delete(&mut self, src_ip: u32) {
        let _ = spa_whitelist.remove(&src_ip);
    }

    fn replay_check_and_record(
        &mut self,
        sig_prefix: u64,
        now_ns: u64,
        window_ns: u64,
    ) -> ReplayStatus {
        if let Some(ptr) = spa_replay_protection.get_ptr(&sig_prefix) {
            let seen = unsafe { *ptr };
            if now_ns.wrapping_sub(seen) < window_ns {
                return ReplayStatus::Replayed;
            }
        }
        let _ = spa_replay_protection.insert(&sig_prefix, &now_ns, 0);
        ReplayStatus::Fresh
    }

    fn config_get(&self, key: ConfigKey) -> Option<u32> {
        let ptr = spa_config.get_ptr(key as u32)?;
        Some(unsafe { *ptr })
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[xdp]
pub fn phantom_ingress(ctx: XdpContext) -> u32 {
    let start = ctx.data();
    let end = ctx.data_end();
    if start >= end {
        return xdp_action::XDP_PASS;
    }
    let frame = unsafe { core::slice::from_raw_parts_mut(start as *mut u8, end - start) };

    let now_ns = unsafe { bpf_ktime_get_ns() };
    let mut tables = KernTables;
    match filter::ingress(frame, &mut tables, now_ns) {
        Verdict::Pass => xdp_action::XDP_PASS,
        Verdict::Drop => xdp_action::XDP_DROP,
    }
}

// ── Required for no_std + no_main ────────────────────────────────────────────

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
