use crate::media::porter::Porter;
use crate::Error;
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn test_get_hands_out_even_in_range_ports() {
    let porter = Porter::new(20000, 20008).expect("new");
    let mut seen = HashSet::new();
    for _ in 0..4 {
        let port = porter.get().expect("get");
        assert!(port % 2 == 0, "port {port} not even");
        assert!((20000..20008).contains(&port), "port {port} out of range");
        assert!(seen.insert(port), "port {port} leased twice");
    }
}

/// Range of four ports holds two RTP/RTCP pairs; the third lease fails and
/// freeing a pair makes room again.
#[test]
fn test_exhaustion_and_reuse() {
    let porter = Porter::new(20000, 20004).expect("new");

    let first = porter.get().expect("first");
    let second = porter.get().expect("second");
    assert_ne!(first, second);

    match porter.get() {
        Err(Error::NoFreePorts) => {}
        other => panic!("expected NoFreePorts, got {other:?}"),
    }

    porter.free(first);
    let third = porter.get().expect("after free");
    assert_eq!(third, first);
}

#[test]
fn test_rejects_invalid_range() {
    assert!(Porter::new(20000, 20000).is_err());
    assert!(Porter::new(30000, 20000).is_err());
    assert!(Porter::new(20001, 20005).is_err());
}

/// Concurrent leases never alias: every outstanding port is unique, even
/// and inside the range.
#[test]
fn test_concurrent_get_and_free() {
    let porter = Arc::new(Porter::new(30000, 30400).expect("new"));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let porter = porter.clone();
        handles.push(std::thread::spawn(move || {
            let mut held = Vec::new();
            for round in 0..20 {
                let port = porter.get().expect("get");
                assert!(port % 2 == 0 && (30000..30400).contains(&port));
                held.push(port);
                if round % 3 == 0 {
                    if let Some(p) = held.pop() {
                        porter.free(p);
                    }
                }
            }
            held
        }));
    }

    let mut outstanding = HashSet::new();
    for handle in handles {
        for port in handle.join().expect("join") {
            assert!(outstanding.insert(port), "port {port} leased twice");
        }
    }
}
