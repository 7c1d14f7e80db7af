//! Magic-port UDP listener for dynamic SPA.
//!
//! The ingress program PASSes structurally valid, first-seen dynamic magic
//! packets up the stack; they land here. On successful TOTP + signature
//! verification the whitelist grant is written from userspace — the kernel
//! only ever writes grants for static-mode tokens.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use phantom_grid_ebpf::{monotonic_now_ns, PhantomShield};

use crate::error::Result;
use crate::verify::SpaVerifier;

/// Largest payload worth reading: a shaped packet is at most 78 bytes, but
/// unknown shapes also arrive here in permissive builds.
const MAX_DATAGRAM: usize = 512;

pub async fn run(
    shield: Arc<Mutex<PhantomShield>>,
    verifier: SpaVerifier,
    magic_port: u16,
    whitelist_ttl_secs: u32,
) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", magic_port)).await?;
    info!(magic_port, "dynamic SPA listener bound");

    let whitelist_ttl_ns = u64::from(whitelist_ttl_secs) * 1_000_000_000;
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let SocketAddr::V4(peer) = peer else {
            debug!("ignoring non-IPv4 magic packet");
            continue;
        };

        match verifier.verify(&buf[..len]) {
            Ok(()) => {
                let expiry_ns = monotonic_now_ns() + whitelist_ttl_ns;
                let mut shield = shield.lock().await;
                match shield.whitelist_put(*peer.ip(), expiry_ns) {
                    Ok(()) => {
                        if let Err(err) = shield.counter_add("spa_auth_success", 1) {
                            debug!(%err, "could not bump spa_auth_success");
                        }
                        info!(src = %peer.ip(), ttl_secs = whitelist_ttl_secs, "dynamic SPA grant written");
                    }
                    Err(err) => warn!(src = %peer.ip(), %err, "failed to write whitelist grant"),
                }
            }
            Err(rejection) => {
                warn!(src = %peer.ip(), %rejection, "magic packet rejected");
                let mut shield = shield.lock().await;
                if let Err(err) = shield.counter_add("spa_auth_failed", 1) {
                    debug!(%err, "could not bump spa_auth_failed");
                }
            }
        }
    }
}
