use outbox_types::{Clock, ManualClock, SystemClock, Timestamp};
use std::time::Duration;

// ── Timestamp ────────────────────────────────────────────────────

#[test]
fn now_is_after_epoch() {
    assert!(Timestamp::now() > Timestamp::EPOCH);
}

#[test]
fn saturating_add_shifts_forward() {
    let ts = Timestamp::from_millis(1_000);
    assert_eq!(ts.saturating_add(Duration::from_secs(2)).as_millis(), 3_000);
}

#[test]
fn saturating_add_does_not_overflow() {
    let ts = Timestamp::from_millis(u64::MAX - 1);
    assert_eq!(ts.saturating_add(Duration::from_secs(10)).as_millis(), u64::MAX);
}

#[test]
fn saturating_since_clamps_to_zero() {
    let early = Timestamp::from_millis(100);
    let late = Timestamp::from_millis(400);
    assert_eq!(late.saturating_since(early), Duration::from_millis(300));
    assert_eq!(early.saturating_since(late), Duration::ZERO);
}

#[test]
fn serializes_as_number() {
    let json = serde_json::to_string(&Timestamp::from_millis(42)).unwrap();
    assert_eq!(json, "42");
}

// ── Clocks ───────────────────────────────────────────────────────

#[test]
fn system_clock_tracks_wall_time() {
    let before = Timestamp::now();
    let read = SystemClock.now();
    assert!(read >= before);
}

#[test]
fn manual_clock_advances_only_when_told() {
    let clock = ManualClock::new(Timestamp::from_millis(10));
    assert_eq!(clock.now().as_millis(), 10);
    clock.advance(Duration::from_millis(5));
    assert_eq!(clock.now().as_millis(), 15);
}

#[test]
fn manual_clock_clones_share_time() {
    let clock = ManualClock::new(Timestamp::EPOCH);
    let other = clock.clone();
    clock.set(Timestamp::from_millis(99));
    assert_eq!(other.now().as_millis(), 99);
}
