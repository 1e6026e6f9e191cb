/// Current UTC timestamp in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Milliseconds per day, for plan / storage expiry arithmetic
pub const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Generate a payment tracking number.
///
/// Layout (63 bits, always positive):
///   - 43 bits: milliseconds since 2024-01-01 UTC (~278 years)
///   - 20 bits: random (1M values per ms)
///
/// Numbers are monotonic at millisecond granularity and unique across
/// instances with overwhelming probability; the `payments.tracking_number`
/// unique key catches the rest.
pub fn tracking_number() -> i64 {
    use rand::Rng;
    // Custom epoch: 2024-01-01 00:00:00 UTC
    const EPOCH_MS: i64 = 1_704_067_200_000;
    let ts = (now_millis() - EPOCH_MS) & 0x7FF_FFFF_FFFF; // 43 bits
    let rand_bits: i64 = rand::thread_rng().gen_range(0..0x10_0000); // 20 bits
    (ts << 20) | rand_bits
}

/// Format epoch millis as RFC 3339 (UTC, millisecond precision)
pub fn millis_to_rfc3339(millis: i64) -> String {
    use chrono::{SecondsFormat, TimeZone, Utc};
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp into epoch millis
pub fn rfc3339_to_millis(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_numbers_are_positive_and_ordered_by_time() {
        let a = tracking_number();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = tracking_number();
        assert!(a > 0);
        assert!(b > a);
    }

    #[test]
    fn rfc3339_roundtrip_keeps_millis() {
        let millis = 1_718_000_000_123;
        let s = millis_to_rfc3339(millis);
        assert!(s.ends_with('Z'));
        assert_eq!(rfc3339_to_millis(&s), Some(millis));
    }
}
