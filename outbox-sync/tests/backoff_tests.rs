use outbox_sync::RetryPolicy;
use outbox_types::Timestamp;
use proptest::prelude::*;
use std::time::Duration;

#[test]
fn default_schedule() {
    let policy = RetryPolicy::default();
    let delays: Vec<u128> = (1..=6).map(|n| policy.delay_for(n).as_millis()).collect();
    assert_eq!(delays, vec![5_000, 10_000, 20_000, 40_000, 60_000, 60_000]);
}

#[test]
fn next_attempt_is_relative_to_now() {
    let policy = RetryPolicy::default();
    let now = Timestamp::from_millis(10_000);
    assert_eq!(policy.next_attempt_at(now, 2), Timestamp::from_millis(20_000));
}

#[test]
fn policy_deserializes_with_defaults() {
    let policy: RetryPolicy = serde_json::from_str(r#"{"base_delay_ms": 1}"#).unwrap();
    assert_eq!(policy.base_delay_ms, 1);
    assert_eq!(policy.max_delay_ms, 60_000);
}

proptest! {
    #[test]
    fn delays_never_shrink_and_respect_cap(
        base in 1u64..100_000,
        multiplier in 0.0f64..10.0,
        cap in 1u64..10_000_000,
        retries in 1u32..64,
    ) {
        let policy = RetryPolicy { base_delay_ms: base, multiplier, max_delay_ms: cap };
        let current = policy.delay_for(retries);
        let next = policy.delay_for(retries + 1);

        prop_assert!(next >= current);
        prop_assert!(current <= Duration::from_millis(cap));
        prop_assert!(current >= Duration::from_millis(base.min(cap)));
    }
}
