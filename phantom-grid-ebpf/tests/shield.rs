use std::net::Ipv4Addr;

use phantom_grid_ebpf::{monotonic_now_ns, whitelist_key};

#[test]
fn test_whitelist_key_is_big_endian_numeric() {
    // Must match what the ingress program reads out of ip->saddr:
    // the four octets interpreted as a big-endian u32.
    assert_eq!(whitelist_key(Ipv4Addr::new(1, 2, 3, 4)), 0x0102_0304);
    assert_eq!(whitelist_key(Ipv4Addr::new(203, 0, 113, 7)), u32::from_be_bytes([203, 0, 113, 7]));
}

#[test]
fn test_whitelist_key_different_ips() {
    let k1 = whitelist_key(Ipv4Addr::new(10, 0, 0, 1));
    let k2 = whitelist_key(Ipv4Addr::new(10, 0, 0, 2));
    assert_ne!(k1, k2);
}

#[test]
fn test_monotonic_clock_is_nondecreasing() {
    let a = monotonic_now_ns();
    let b = monotonic_now_ns();
    assert!(a > 0);
    assert!(b >= a);
}
