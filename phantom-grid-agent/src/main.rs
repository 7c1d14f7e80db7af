#![forbid(unsafe_code)]

mod config;
mod error;
mod listener;
mod verify;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use phantom_grid_ebpf::{PhantomShield, SpaRuntimeConfig};
use phantom_grid_ebpf_common::ports;
use phantom_grid_ebpf_common::spa::SpaMode;

use crate::config::{Config, SpaModeConfig};
use crate::error::{AgentError, Result};
use crate::verify::SpaVerifier;

#[derive(Parser, Debug)]
#[command(author, version, about = "Phantom Grid control-plane agent")]
struct Cli {
    /// Network interface to attach the datapath programs to
    #[arg(short, long, value_name = "IFACE")]
    iface: String,

    /// Path to configuration TOML file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config/phantom-grid.toml"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    match config::load_from_path(&cli.config) {
        Ok(cfg) => {
            info!(iface = %cli.iface, mode = ?cfg.spa.mode, dlp_enforce = cfg.egress.enforce, "configuration loaded");
            if let Err(err) = run(&cli.iface, cfg).await {
                error!(%err, "agent exited with error");
                std::process::exit(1);
            }
        }
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    }
}

async fn run(iface: &str, cfg: Config) -> Result<()> {
    warn_on_port_overlap();

    let secrets = config::secrets(&cfg)?;
    let mode = SpaMode::from(cfg.spa.mode);

    let mut shield = PhantomShield::attach(iface, cfg.egress.enforce)?;
    shield.set_spa_config(SpaRuntimeConfig {
        totp_step_secs: cfg.spa.totp_step_secs,
        totp_tolerance: cfg.spa.totp_tolerance,
        replay_window_secs: cfg.spa.replay_window_secs,
        mode,
    })?;
    if let Some(totp) = secrets.totp.as_ref() {
        shield.set_totp_secret(totp)?;
    }
    if let Some(hmac) = secrets.hmac.as_ref() {
        shield.set_hmac_secret(hmac)?;
    }

    let shield = Arc::new(Mutex::new(shield));

    if cfg.spa.mode != SpaModeConfig::Static {
        let totp = secrets
            .totp
            .ok_or_else(|| AgentError::Config("dynamic SPA requires a TOTP secret".into()))?;
        let verifier = SpaVerifier::new(
            mode,
            totp,
            cfg.spa.totp_step_secs,
            cfg.spa.totp_tolerance,
            secrets.hmac,
            secrets.ed25519_public,
        )?;
        let shield = shield.clone();
        let ttl = cfg.spa.whitelist_ttl_secs;
        tokio::spawn(async move {
            if let Err(err) = listener::run(shield, verifier, ports::SPA_MAGIC_PORT, ttl).await {
                error!(%err, "dynamic SPA listener exited");
            }
        });
    }

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.stats_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => log_stats(&shield).await,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down, detaching datapath programs");
                return Ok(());
            }
        }
    }
}

async fn log_stats(shield: &Arc<Mutex<PhantomShield>>) {
    let stats = { shield.lock().await.stats() };
    match stats {
        Ok(s) => info!(
            attacks = s.attack_stats,
            stealth_drops = s.stealth_drops,
            os_mutations = s.os_mutations,
            spa_ok = s.spa_auth_success,
            spa_failed = s.spa_auth_failed,
            replays_blocked = s.spa_replay_blocked,
            egress_blocks = s.egress_blocks,
            patterns = ?s.suspicious_patterns,
            hostile_total = s.hostile_total(),
            "counters"
        ),
        Err(err) => warn!(%err, "failed to read counter snapshot"),
    }
}

/// Operator intent is ambiguous for ports that are both protected and
/// decoyed; the datapath resolves the conflict in favour of protection.
fn warn_on_port_overlap() {
    let overlapping: Vec<u16> = ports::MIRAGE_PORTS
        .iter()
        .copied()
        .filter(|p| ports::is_critical_port(*p))
        .collect();
    if !overlapping.is_empty() {
        warn!(
            ports = ?overlapping,
            "critical and mirage port sets intersect; critical wins, these decoys are unreachable"
        );
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
