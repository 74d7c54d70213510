use rand::Rng;
use time::{Duration, OffsetDateTime};

/// A freshly issued one-time code bound to its expiry. The pair is persisted
/// together and cleared together; a code without an expiry never exists.
#[derive(Debug, Clone)]
pub struct OneTimeCode {
    pub code: String,
    pub expires_at: OffsetDateTime,
}

impl OneTimeCode {
    /// Six random digits, leading zeros kept.
    pub fn issue(ttl_minutes: i64) -> Self {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self {
            code: format!("{:06}", n),
            expires_at: OffsetDateTime::now_utc() + Duration::minutes(ttl_minutes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_six_digits() {
        for _ in 0..100 {
            let otc = OneTimeCode::issue(10);
            assert_eq!(otc.code.len(), 6);
            assert!(otc.code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn expiry_honors_ttl() {
        let otc = OneTimeCode::issue(10);
        let delta = otc.expires_at - OffsetDateTime::now_utc();
        assert!(delta > Duration::minutes(9));
        assert!(delta <= Duration::minutes(10));
    }
}
