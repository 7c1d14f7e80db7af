//! Core logic of the Phantom Grid deception surface.
//!
//! Everything that decides a packet's fate lives here: the bounds-checked
//! frame views, the port policy, stealth-scan detection, SPA magic-packet
//! validation, OS-personality mutation, the egress DLP classifier, and the
//! two verdict state machines composed from them.
//!
//! This crate is `no_std` so it can be compiled for both targets:
//! - `bpfel-unknown-none` (the XDP/TC programs in `phantom-grid-ebpf-kern`)
//! - the host target (userspace crates and the test suite)
//!
//! Shared kernel/userspace state (counters, whitelist, replay table, config
//! slots) is reached through the traits in [`tables`], so the same state
//! machines run against BPF maps in the kernel and against plain structs in
//! tests.
#![no_std]

pub mod dlp;
pub mod filter;
pub mod packet;
pub mod personality;
pub mod ports;
pub mod scan;
pub mod spa;
pub mod tables;

pub use filter::Verdict;
