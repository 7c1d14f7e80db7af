/// Minimal diagnostic: tries to load both embedded BPF ELFs and create
/// their maps, without attaching anything.
///
/// Log level resolution (first wins):
///   1. RUST_LOG env:  RUST_LOG=debug cargo run -p phantom-grid-ebpf --bin bpf_check
///   2. CLI argument:  cargo run -p phantom-grid-ebpf --bin bpf_check -- debug
///   3. Default:       info
fn main() {
    let default_level = std::env::args().nth(1).unwrap_or_else(|| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let objects = [
        (
            "phantom-grid-ingress",
            aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/phantom-grid-ingress.bpf.o")),
        ),
        (
            "phantom-grid-egress",
            aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/phantom-grid-egress.bpf.o")),
        ),
    ];

    let mut failed = false;
    for (name, bytes) in objects {
        if bytes.is_empty() {
            tracing::error!(name, "placeholder object embedded — rebuild with the nightly BPF toolchain installed");
            failed = true;
            continue;
        }
        match aya::Ebpf::load(bytes) {
            Ok(_ebpf) => {
                tracing::info!(name, "BPF ELF loaded and all maps created OK");
            }
            Err(e) => {
                tracing::error!(name, error = ?e, "BPF ELF load error");
                tracing::warn!("Check: sudo cat /proc/sys/kernel/unprivileged_bpf_disabled");
                tracing::warn!("Check: sudo dmesg | grep -i bpf | tail -5");
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
