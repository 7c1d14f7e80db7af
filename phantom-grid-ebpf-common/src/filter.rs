//! The two verdict state machines.
//!
//! [`ingress`] runs on every received frame: ICMP passes, UDP is screened
//! for magic packets, and TCP walks the gauntlet of honeypot pass-through,
//! critical-port gating, mirage decoys, stealth-scan detection, and finally
//! stateless SYN redirection into the honeypot.
//!
//! [`egress`] runs on every transmitted frame and inspects honeypot-sourced
//! payloads for sensitive-content patterns.
//!
//! Malformed frames PASS without touching any table; policy violations DROP
//! and count. Nothing else is ever surfaced from the fast path.

use crate::packet::{
    write_u16, write_u8, PacketView, IPPROTO_ICMP, IPPROTO_TCP, IPPROTO_UDP,
};
use crate::personality::{self, Personality};
use crate::tables::{ConfigKey, Counter, Metrics, PatternMetrics, ReplayStatus, Tables};
use crate::{dlp, ports, scan, spa};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Continue up the normal stack (or out the wire, for egress).
    Pass,
    /// Discard silently. The egress program maps this onto SHOT.
    Drop,
}

/// Mutation plan produced while the frame is still borrowed for parsing.
/// Offsets are absolute into the frame.
struct Redirect {
    tcp_dest_at: usize,
    tcp_check_at: usize,
    tcp_window_at: usize,
    ip_ttl_at: usize,
    ip_check_at: usize,
    cur_ttl: u8,
    cur_window: u16,
    personality: Personality,
}

enum Step {
    Done(Verdict),
    Redirect(Redirect),
}

/// Ingress state machine. `now_ns` is the monotonic clock shared with the
/// control plane.
pub fn ingress<T: Tables>(frame: &mut [u8], tables: &mut T, now_ns: u64) -> Verdict {
    let plan = match decide(frame, tables, now_ns) {
        Step::Done(verdict) => return verdict,
        Step::Redirect(plan) => plan,
    };

    // Stateless DNAT: rewrite the destination port and zero the checksum;
    // the generic XDP path recomputes it before the stack sees the packet.
    write_u16(frame, plan.tcp_dest_at, ports::HONEYPOT_PORT);
    write_u16(frame, plan.tcp_check_at, 0);

    let p = plan.personality;
    if p.ttl != plan.cur_ttl {
        write_u8(frame, plan.ip_ttl_at, p.ttl);
        write_u16(frame, plan.ip_check_at, 0);
    }
    if p.window != plan.cur_window {
        write_u16(frame, plan.tcp_window_at, p.window);
        write_u16(frame, plan.tcp_check_at, 0);
    }
    tables.counter_inc(Counter::OsMutations);
    tables.counter_inc(Counter::AttackStats);

    Verdict::Pass
}

fn decide<T: Tables>(frame: &[u8], tables: &mut T, now_ns: u64) -> Step {
    let Some(eth) = PacketView::new(frame).ethernet() else {
        return Step::Done(Verdict::Pass);
    };
    let Some(ip) = eth.ipv4() else {
        // Non-IPv4 (and truncated IPv4) traffic is none of our business.
        return Step::Done(Verdict::Pass);
    };

    match ip.protocol() {
        // Diagnostics must keep working.
        IPPROTO_ICMP => Step::Done(Verdict::Pass),

        IPPROTO_UDP => {
            let Some(udp) = ip.udp() else {
                return Step::Done(Verdict::Pass);
            };
            if udp.dest() != ports::SPA_MAGIC_PORT {
                // DNS, DHCP, NTP, ...
                return Step::Done(Verdict::Pass);
            }
            Step::Done(handle_magic_packet(udp.payload(), ip.saddr(), tables, now_ns))
        }

        IPPROTO_TCP => {
            let Some(tcp) = ip.tcp() else {
                return Step::Done(Verdict::Pass);
            };
            let dest = tcp.dest();

            // Honeypot traffic passes untouched; the kernel may have
            // already fixed up its checksums.
            if ports::is_honeypot_port(dest) {
                return Step::Done(Verdict::Pass);
            }

            // Phantom Protocol: critical assets answer only to whitelisted
            // sources. Checked before the mirage table so a port listed in
            // both stays protected.
            if ports::is_critical_port(dest) {
                if is_whitelisted(tables, ip.saddr(), now_ns) {
                    return Step::Done(Verdict::Pass);
                }
                return Step::Done(Verdict::Drop);
            }

            // The Mirage: decoy ports are served by the honeypot's own
            // listeners, no rewrite needed.
            if ports::is_mirage_port(dest) {
                tables.counter_inc(Counter::AttackStats);
                return Step::Done(Verdict::Pass);
            }

            if scan::classify(tcp.flags()).is_some() {
                tables.counter_inc(Counter::StealthDrops);
                return Step::Done(Verdict::Drop);
            }

            // The Portal: unsolicited connection attempts are rewritten to
            // the honeypot port. Only inbound initiations (SYN without ACK)
            // are captured so flows this host initiates keep working.
            let flags = tcp.flags();
            if flags & scan::flags::SYN != 0 && flags & scan::flags::ACK == 0 {
                return Step::Redirect(Redirect {
                    tcp_dest_at: tcp.dest_offset(),
                    tcp_check_at: tcp.check_offset(),
                    tcp_window_at: tcp.window_offset(),
                    ip_ttl_at: ip.ttl_offset(),
                    ip_check_at: ip.check_offset(),
                    cur_ttl: ip.ttl(),
                    cur_window: tcp.window(),
                    personality: personality::for_source_port(tcp.source()),
                });
            }

            Step::Done(Verdict::Pass)
        }

        _ => Step::Done(Verdict::Pass),
    }
}

/// SPA admission for a datagram on the magic port. Always consumes static
/// attempts; dynamic-mode packets that clear the structural and anti-replay
/// checks PASS so the control plane can do the cryptographic half.
fn handle_magic_packet<T: Tables>(
    payload: &[u8],
    src_ip: u32,
    tables: &mut T,
    now_ns: u64,
) -> Verdict {
    let mode = spa::SpaMode::from_config(tables.config_get(ConfigKey::SpaMode));

    if mode == spa::SpaMode::Static {
        if spa::static_token_matches(payload) {
            tables.whitelist_put(src_ip, now_ns + ports::WHITELIST_TTL_NS);
            tables.counter_inc(Counter::SpaAuthSuccess);
        } else {
            tables.counter_inc(Counter::SpaAuthFailed);
        }
        // Magic packets never travel further than this hop.
        return Verdict::Drop;
    }

    match spa::parse_dynamic(payload) {
        Some(packet) => {
            let window_secs = tables
                .config_get(ConfigKey::ReplayWindowSecs)
                .unwrap_or(spa::DEFAULT_REPLAY_WINDOW_SECS);
            let window_ns = u64::from(window_secs) * 1_000_000_000;
            match tables.replay_check_and_record(packet.sig_prefix(), now_ns, window_ns) {
                ReplayStatus::Replayed => {
                    tables.counter_inc(Counter::SpaReplayBlocked);
                    Verdict::Drop
                }
                // Structure is sound and the signature is first-seen: hand
                // the packet to userspace for TOTP + signature verification.
                ReplayStatus::Fresh => Verdict::Pass,
            }
        }
        #[cfg(feature = "strict-spa-shape")]
        None => {
            tables.counter_inc(Counter::SpaAuthFailed);
            Verdict::Drop
        }
        // Unknown shapes pass through so userspace policy can serve
        // custom-length tokens on the same port.
        #[cfg(not(feature = "strict-spa-shape"))]
        None => Verdict::Pass,
    }
}

/// Whitelist check with lazy expiry: a stale entry is deleted on sight. A
/// racing delete is harmless, the next SPA success recreates the entry.
fn is_whitelisted<T: Tables>(tables: &mut T, src_ip: u32, now_ns: u64) -> bool {
    match tables.whitelist_get(src_ip) {
        None => false,
        Some(expiry_ns) if now_ns > expiry_ns => {
            tables.whitelist_delete(src_ip);
            false
        }
        Some(_) => true,
    }
}

/// Egress state machine: DLP over outbound honeypot payloads.
///
/// `enforce` selects between dropping leaks and observe-only counting; it is
/// patched into the egress program at load time.
pub fn egress<T: PatternMetrics>(frame: &[u8], tables: &mut T, enforce: bool) -> Verdict {
    let Some(ip) = PacketView::new(frame).ethernet().and_then(|eth| eth.ipv4()) else {
        return Verdict::Pass;
    };
    if ip.protocol() != IPPROTO_TCP {
        return Verdict::Pass;
    }
    let Some(tcp) = ip.tcp() else {
        return Verdict::Pass;
    };
    if tcp.source() != ports::HONEYPOT_PORT {
        return Verdict::Pass;
    }
    let Some(payload) = tcp.payload() else {
        return Verdict::Pass;
    };

    match dlp::classify(payload) {
        Some(pattern) => {
            tables.counter_inc(Counter::EgressBlocks);
            tables.pattern_inc(pattern);
            if enforce {
                Verdict::Drop
            } else {
                Verdict::Pass
            }
        }
        None => Verdict::Pass,
    }
}
