//! 寺庙 QR 签到码
//!
//! 签到码为 `sha256("{secret}:{temple_id}:{YYYY-MM-DD}")` 的十六进制串，按 UTC 日期每日更换。

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// 生成指定寺庙当日的签到码
pub fn checkin_token(secret: &str, temple_id: i64, date: NaiveDate) -> String {
    let payload = format!("{}:{}:{}", secret, temple_id, date.format("%Y-%m-%d"));
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

/// 校验签到码，忽略大小写与首尾空白
pub fn verify_checkin_token(secret: &str, temple_id: i64, date: NaiveDate, token: &str) -> bool {
    checkin_token(secret, temple_id, date).eq_ignore_ascii_case(token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[test]
    fn test_token_is_hex_sha256() {
        let token = checkin_token("secret", 1, date(1));
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_token_rotates_by_day_and_temple() {
        let base = checkin_token("secret", 1, date(1));
        assert_eq!(base, checkin_token("secret", 1, date(1)));
        assert_ne!(base, checkin_token("secret", 1, date(2)));
        assert_ne!(base, checkin_token("secret", 2, date(1)));
        assert_ne!(base, checkin_token("other", 1, date(1)));
    }

    #[test]
    fn test_verify() {
        let token = checkin_token("secret", 5, date(3));
        assert!(verify_checkin_token("secret", 5, date(3), &token));
        assert!(verify_checkin_token("secret", 5, date(3), &format!(" {} ", token.to_uppercase())));
        assert!(!verify_checkin_token("secret", 5, date(4), &token));
        assert!(!verify_checkin_token("secret", 5, date(3), "deadbeef"));
    }
}
