use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Compile the BPF kernel programs (`phantom-grid-ebpf-kern`) using
/// `cargo build` for the `bpfel-unknown-none` target.
///
/// The resulting ELF binaries are embedded into the userspace crate via
/// `aya::include_bytes_aligned!` in `shield.rs`.
///
/// Requirements: Rust nightly toolchain with the `rust-src` component.
/// The `rust-toolchain.toml` in `phantom-grid-ebpf-kern/` pins the channel.
///
/// When the BPF toolchain is unavailable (or `PHANTOM_GRID_SKIP_BPF=1` is
/// set) empty placeholder objects are emitted instead so the userspace
/// crates still compile and unit-test; loading them reports a clear error
/// at runtime.
const PROGRAMS: [&str; 2] = ["phantom-grid-ingress", "phantom-grid-egress"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?);
    let workspace_root = manifest_dir.parent().ok_or("could not find workspace root")?;
    let kern_dir = workspace_root.join("phantom-grid-ebpf-kern");
    let common_dir = workspace_root.join("phantom-grid-ebpf-common");

    println!("cargo:rerun-if-changed={}", kern_dir.join("src/ingress.rs").display());
    println!("cargo:rerun-if-changed={}", kern_dir.join("src/egress.rs").display());
    println!("cargo:rerun-if-changed={}", kern_dir.join("Cargo.toml").display());
    println!("cargo:rerun-if-changed={}", common_dir.join("src").display());
    println!("cargo:rerun-if-env-changed=PHANTOM_GRID_SKIP_BPF");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    if std::env::var("PHANTOM_GRID_SKIP_BPF").is_ok_and(|v| v == "1") {
        println!("cargo:warning=PHANTOM_GRID_SKIP_BPF=1: embedding placeholder BPF objects");
        return write_stubs(&out_dir);
    }

    let bpf_target_dir = out_dir.join("bpf-programs-target");

    // When cargo runs a build script it sets RUSTC, RUSTDOC, and
    // RUSTUP_TOOLCHAIN pointing at the *current* (stable) toolchain. Those
    // variables would be inherited by the child cargo process and override
    // the nightly selection we need. We remove them so rustup can pick the
    // toolchain from the rust-toolchain.toml in phantom-grid-ebpf-kern/.
    let status = Command::new("cargo")
        .args(["build", "--release"])
        .env("CARGO_TARGET_DIR", &bpf_target_dir)
        .env_remove("RUSTC")
        .env_remove("RUSTDOC")
        .env_remove("RUSTUP_TOOLCHAIN")
        .env_remove("RUSTC_WORKSPACE_WRAPPER")
        .env_remove("RUSTC_WRAPPER")
        .current_dir(&kern_dir)
        .status();

    match status {
        Ok(s) if s.success() => {}
        Ok(s) => {
            println!(
                "cargo:warning=BPF build of phantom-grid-ebpf-kern failed (exit {:?}); \
                embedding placeholder objects. Install the toolchain with: \
                rustup toolchain install nightly && \
                rustup component add rust-src --toolchain nightly",
                s.code()
            );
            return write_stubs(&out_dir);
        }
        Err(e) => {
            println!("cargo:warning=failed to run cargo for the BPF build ({e}); embedding placeholder objects");
            return write_stubs(&out_dir);
        }
    }

    for program in PROGRAMS {
        let bpf_bin = bpf_target_dir.join("bpfel-unknown-none/release").join(program);
        if !bpf_bin.exists() {
            return Err(format!("BPF binary not found at {}", bpf_bin.display()).into());
        }
        fs::copy(&bpf_bin, out_dir.join(format!("{program}.bpf.o")))?;
    }

    Ok(())
}

fn write_stubs(out_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    for program in PROGRAMS {
        fs::write(out_dir.join(format!("{program}.bpf.o")), [])?;
    }
    Ok(())
}
