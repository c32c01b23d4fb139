//! Reconnect backoff policy.

use warelay::providers::ReconnectPolicy;

#[test]
fn deterministic_sequence_without_jitter() {
    let policy = ReconnectPolicy {
        initial_ms: 100,
        max_ms: 800,
        factor: 2,
        jitter_pct: 0,
        max_attempts: 4,
    };
    let delays: Vec<u128> = (0..4).map(|n| policy.delay_for(n).as_millis()).collect();
    assert_eq!(delays, vec![100, 200, 400, 800]);
}

#[test]
fn delay_saturates_at_cap() {
    let policy = ReconnectPolicy {
        initial_ms: 100,
        max_ms: 800,
        factor: 2,
        jitter_pct: 0,
        max_attempts: 32,
    };
    assert_eq!(policy.delay_for(20).as_millis(), 800);
}

#[test]
fn jitter_stays_within_band() {
    let policy = ReconnectPolicy {
        initial_ms: 1_000,
        max_ms: 60_000,
        factor: 2,
        jitter_pct: 20,
        max_attempts: 4,
    };
    for _ in 0..50 {
        let ms = policy.delay_for(0).as_millis();
        assert!((800..=1_200).contains(&ms), "delay {ms} out of band");
    }
}

#[test]
fn factor_one_keeps_constant_delay() {
    let policy = ReconnectPolicy {
        initial_ms: 250,
        max_ms: 60_000,
        factor: 1,
        jitter_pct: 0,
        max_attempts: 4,
    };
    assert_eq!(policy.delay_for(3).as_millis(), 250);
}
