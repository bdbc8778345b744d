use chrono::Utc;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Next timestamp for a sequence that must stay strictly increasing even
/// when the clock stalls or steps backwards.
pub fn monotonic_after(previous: Option<i64>, now: i64) -> i64 {
    match previous {
        Some(last) if now <= last => last + 1,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_after_bumps_stalled_clock() {
        assert_eq!(monotonic_after(None, 10), 10);
        assert_eq!(monotonic_after(Some(5), 10), 10);
        assert_eq!(monotonic_after(Some(10), 10), 11);
        assert_eq!(monotonic_after(Some(12), 10), 13);
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
