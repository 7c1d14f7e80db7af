//! TC egress program: DLP scan of outbound honeypot payloads.
//!
//! Attached on the clsact egress hook of the same interfaces as the ingress
//! program. Enforcement is selected at load time: the loader patches the
//! `dlp_enforce` global before the kernel verifies the program.
#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::{
    macros::{classifier, map},
    maps::Array,
    programs::TcContext,
};

use phantom_grid_ebpf_common::dlp::Pattern;
use phantom_grid_ebpf_common::filter::{self, Verdict};
use phantom_grid_ebpf_common::tables::{Counter, Metrics, PatternMetrics};

const TC_ACT_OK: i32 = 0;
const TC_ACT_SHOT: i32 = 2;

// ── Globals patched at load time by EbpfLoader::set_global ──────────────────

/// Non-zero: leaking packets are shot. Zero: observe-only, count and pass.
#[no_mangle]
#[allow(non_upper_case_globals)]
static dlp_enforce: u8 = 0;

// ── Maps ─────────────────────────────────────────────────────────────────────

#[map]
#[allow(non_upper_case_globals)]
static egress_blocks: Array<u64> = Array::with_max_entries(1, 0);

/// Per-pattern hit counters, indexed by pattern id (1-based).
#[map]
#[allow(non_upper_case_globals)]
static suspicious_patterns: Array<u64> = Array::with_max_entries(10, 0);

struct EgressTables;

impl EgressTables {
    fn bump(map: &Array<u64>, index: u32) {
        if let Some(ptr) = map.get_ptr_mut(index) {
            let slot = unsafe { &*(ptr as *const AtomicU64) };
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Metrics for EgressTables {
    fn counter_inc(&mut self, counter: Counter) {
        // The only singleton counter on the egress path.
        if counter == Counter::EgressBlocks {
            Self::bump(&egress_blocks, 0);
        }
    }
}

impl PatternMetrics for EgressTables {
    fn pattern_inc(&mut self, pattern: Pattern) {
        Self::bump(&suspicious_patterns, pattern.slot());
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[classifier]
pub fn phantom_egress(ctx: TcContext) -> i32 {
    let start = ctx.data();
    let end = ctx.data_end();
    if start >= end {
        return TC_ACT_OK;
    }
    let frame = unsafe { core::slice::from_raw_parts(start as *const u8, end - start) };

    let enforce = unsafe { core::ptr::read_volatile(&dlp_enforce) } != 0;
    let mut tables = EgressTables;
    match filter::egress(frame, &mut tables, enforce) {
        Verdict::Pass => TC_ACT_OK,
        Verdict::Drop => TC_ACT_SHOT,
    }
}

// ── Required for no_std + no_main ────────────────────────────────────────────

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
