//! Loads, attaches, and fronts the two Phantom Grid datapath programs.
//!
//! The ingress program is an XDP filter; the egress program a clsact TC
//! classifier on the same interface. All shared maps are reached through
//! this handle: the agent writes secrets, config slots, and dynamic-SPA
//! whitelist grants here, and reads the counter snapshot for reporting.

use std::net::Ipv4Addr;

use aya::maps::{Array, HashMap};
use aya::programs::{tc, SchedClassifier, TcAttachType, Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader};
use tracing::{debug, info};

use phantom_grid_ebpf_common::spa::SpaMode;
use phantom_grid_ebpf_common::tables::ConfigKey;

use crate::stats::StatsSnapshot;
use crate::EbpfError;

/// Raw bytes of the compiled BPF objects, embedded at compile time.
/// `include_bytes_aligned!` ensures the 8-byte alignment aya's ELF parser
/// requires.
static INGRESS_BPF_BYTES: &[u8] =
    aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/phantom-grid-ingress.bpf.o"));
static EGRESS_BPF_BYTES: &[u8] =
    aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/phantom-grid-egress.bpf.o"));

/// Values for the four `spa_config` slots.
#[derive(Clone, Copy, Debug)]
pub struct SpaRuntimeConfig {
    pub totp_step_secs: u32,
    pub totp_tolerance: u32,
    pub replay_window_secs: u32,
    pub mode: SpaMode,
}

/// Manages the lifecycle of both datapath programs. Detach happens when the
/// embedded `Ebpf` objects drop.
pub struct PhantomShield {
    ingress: Ebpf,
    egress: Ebpf,
    interface: String,
}

impl PhantomShield {
    /// Load both BPF objects and attach them to `interface`.
    ///
    /// `dlp_enforce` is patched into the egress program's `.rodata` via
    /// `EbpfLoader::set_global` before the kernel loads it: enforcement vs
    /// observe-only is fixed per attachment, not per packet.
    pub fn attach(interface: &str, dlp_enforce: bool) -> Result<Self, EbpfError> {
        // Remove the locked memory limit so BPF maps can be created without
        // depending on `ulimits: memlock: -1` in the deployment environment.
        unsafe {
            let rlim =
                libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
            let _ = libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim);
        }

        let mut ingress = Ebpf::load(INGRESS_BPF_BYTES).map_err(EbpfError::Load)?;
        let program: &mut Xdp = ingress
            .program_mut("phantom_ingress")
            .ok_or(EbpfError::ProgramNotFound("phantom_ingress"))?
            .try_into()
            .map_err(EbpfError::ProgramType)?;
        program.load().map_err(EbpfError::ProgramLoad)?;
        program.attach(interface, XdpFlags::default()).map_err(EbpfError::AttachXdp)?;

        let mut egress = EbpfLoader::new()
            .set_global("dlp_enforce", &u8::from(dlp_enforce), false)
            .load(EGRESS_BPF_BYTES)
            .map_err(EbpfError::Load)?;

        // clsact may already exist on the interface; that is fine.
        if let Err(err) = tc::qdisc_add_clsact(interface) {
            debug!(interface, %err, "clsact qdisc not added (usually already present)");
        }
        let program: &mut SchedClassifier = egress
            .program_mut("phantom_egress")
            .ok_or(EbpfError::ProgramNotFound("phantom_egress"))?
            .try_into()
            .map_err(EbpfError::ProgramType)?;
        program.load().map_err(EbpfError::ProgramLoad)?;
        program.attach(interface, TcAttachType::Egress).map_err(EbpfError::AttachTc)?;

        info!(interface, dlp_enforce, "phantom grid ingress + egress attached");

        Ok(Self { ingress, egress, interface: interface.to_string() })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Point-in-time read of every counter map.
    pub fn stats(&self) -> Result<StatsSnapshot, EbpfError> {
        let mut patterns = [0u64; 5];
        let map = self
            .egress
            .map("suspicious_patterns")
            .ok_or(EbpfError::MapNotFound("suspicious_patterns"))?;
        let array = Array::try_from(map)?;
        for (i, slot) in patterns.iter_mut().enumerate() {
            // Pattern ids are 1-based.
            *slot = array.get(&(i as u32 + 1), 0)?;
        }

        Ok(StatsSnapshot {
            attack_stats: read_counter(&self.ingress, "attack_stats")?,
            stealth_drops: read_counter(&self.ingress, "stealth_drops")?,
            os_mutations: read_counter(&self.ingress, "os_mutations")?,
            spa_auth_success: read_counter(&self.ingress, "spa_auth_success")?,
            spa_auth_failed: read_counter(&self.ingress, "spa_auth_failed")?,
            spa_replay_blocked: read_counter(&self.ingress, "spa_replay_blocked")?,
            egress_blocks: read_counter(&self.egress, "egress_blocks")?,
            suspicious_patterns: patterns,
        })
    }

    /// Admit `src` until `expiry_ns` (monotonic). The control plane calls
    /// this after verifying a dynamic-mode magic packet; static-mode grants
    /// are written by the kernel itself.
    pub fn whitelist_put(&mut self, src: Ipv4Addr, expiry_ns: u64) -> Result<(), EbpfError> {
        let map = self
            .ingress
            .map_mut("spa_whitelist")
            .ok_or(EbpfError::MapNotFound("spa_whitelist"))?;
        let mut whitelist = HashMap::<_, u32, u64>::try_from(map)?;
        whitelist.insert(whitelist_key(src), expiry_ns, 0)?;
        Ok(())
    }

    pub fn whitelist_get(&self, src: Ipv4Addr) -> Result<Option<u64>, EbpfError> {
        let map = self
            .ingress
            .map("spa_whitelist")
            .ok_or(EbpfError::MapNotFound("spa_whitelist"))?;
        let whitelist = HashMap::<_, u32, u64>::try_from(map)?;
        match whitelist.get(&whitelist_key(src), 0) {
            Ok(expiry) => Ok(Some(expiry)),
            Err(aya::maps::MapError::KeyNotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn whitelist_remove(&mut self, src: Ipv4Addr) -> Result<(), EbpfError> {
        let map = self
            .ingress
            .map_mut("spa_whitelist")
            .ok_or(EbpfError::MapNotFound("spa_whitelist"))?;
        let mut whitelist = HashMap::<_, u32, u64>::try_from(map)?;
        match whitelist.remove(&whitelist_key(src)) {
            Ok(()) | Err(aya::maps::MapError::KeyNotFound) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Userspace half of the counter surface. The kernel only writes
    /// `spa_auth_success`/`spa_auth_failed` in static mode, so in dynamic
    /// mode this read-modify-write has a single writer.
    pub fn counter_add(&mut self, name: &'static str, delta: u64) -> Result<(), EbpfError> {
        let map = self.ingress.map_mut(name).ok_or(EbpfError::MapNotFound(name))?;
        let mut array = Array::try_from(map)?;
        let current: u64 = array.get(&0, 0)?;
        array.set(0, current.wrapping_add(delta), 0)?;
        Ok(())
    }

    pub fn set_totp_secret(&mut self, secret: &[u8; 32]) -> Result<(), EbpfError> {
        write_secret(&mut self.ingress, "spa_totp_secret", secret)
    }

    pub fn set_hmac_secret(&mut self, secret: &[u8; 32]) -> Result<(), EbpfError> {
        write_secret(&mut self.ingress, "spa_hmac_secret", secret)
    }

    pub fn set_spa_config(&mut self, config: SpaRuntimeConfig) -> Result<(), EbpfError> {
        let map =
            self.ingress.map_mut("spa_config").ok_or(EbpfError::MapNotFound("spa_config"))?;
        let mut array = Array::try_from(map)?;
        array.set(ConfigKey::TotpStepSecs as u32, config.totp_step_secs, 0)?;
        array.set(ConfigKey::TotpTolerance as u32, config.totp_tolerance, 0)?;
        array.set(ConfigKey::ReplayWindowSecs as u32, config.replay_window_secs, 0)?;
        array.set(ConfigKey::SpaMode as u32, config.mode.config_value(), 0)?;
        Ok(())
    }
}

fn read_counter(obj: &Ebpf, name: &'static str) -> Result<u64, EbpfError> {
    let map = obj.map(name).ok_or(EbpfError::MapNotFound(name))?;
    let array = Array::try_from(map)?;
    Ok(array.get(&0, 0)?)
}

fn write_secret(
    obj: &mut Ebpf,
    name: &'static str,
    secret: &[u8; 32],
) -> Result<(), EbpfError> {
    let map = obj.map_mut(name).ok_or(EbpfError::MapNotFound(name))?;
    let mut array = Array::try_from(map)?;
    for (i, byte) in secret.iter().enumerate() {
        array.set(i as u32, *byte, 0)?;
    }
    Ok(())
}

/// Whitelist key for a source address: the big-endian numeric value of its
/// octets, matching what the ingress program reads out of `ip->saddr`.
pub fn whitelist_key(src: Ipv4Addr) -> u32 {
    u32::from(src)
}

/// Now on the clock the BPF programs stamp with (`bpf_ktime_get_ns` is
/// CLOCK_MONOTONIC). Wall-clock time must never leak into whitelist
/// expiries.
pub fn monotonic_now_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // Cannot fail for CLOCK_MONOTONIC with a valid pointer.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64).saturating_mul(1_000_000_000).saturating_add(ts.tv_nsec as u64)
}
