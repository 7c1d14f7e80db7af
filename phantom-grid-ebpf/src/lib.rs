// eBPF/XDP is Linux-only. This crate does not compile for other targets.
#![cfg(target_os = "linux")]

pub mod shield;
pub mod stats;

pub use shield::{monotonic_now_ns, whitelist_key, PhantomShield, SpaRuntimeConfig};
pub use stats::StatsSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum EbpfError {
    #[error("failed to load BPF object: {0}")]
    Load(#[from] aya::EbpfError),

    #[error("program '{0}' not found in BPF object")]
    ProgramNotFound(&'static str),

    #[error("BPF program has an unexpected type: {0}")]
    ProgramType(#[source] aya::programs::ProgramError),

    #[error("failed to load BPF program into the kernel: {0}")]
    ProgramLoad(#[source] aya::programs::ProgramError),

    #[error("failed to attach XDP program to interface: {0}")]
    AttachXdp(#[source] aya::programs::ProgramError),

    #[error("failed to attach TC egress program to interface: {0}")]
    AttachTc(#[source] aya::programs::ProgramError),

    #[error("map '{0}' not found in BPF object")]
    MapNotFound(&'static str),

    #[error("map access failed: {0}")]
    Map(#[from] aya::maps::MapError),
}
