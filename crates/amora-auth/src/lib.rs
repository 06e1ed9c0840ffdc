//! Verification of Telegram Mini-App `initData` payloads.
//!
//! The payload is a query-string-encoded set of key=value pairs carrying a
//! `hash` field signed by the bot token. Verification recomputes the signature
//! over the sorted remaining pairs with a two-pass keyed HMAC-SHA256 and
//! compares in constant time. Pure function, no I/O.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The user record Telegram embeds in `initData`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
    pub is_premium: Option<bool>,
    pub photo_url: Option<String>,
}

/// Successfully verified init data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    /// Embedded user record. A malformed record is tolerated (None) as long as
    /// the signature checked out; callers that require an identity must reject.
    pub user: Option<TelegramUser>,
    /// Unix timestamp at which Telegram issued the payload.
    pub auth_date: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("hash field missing")]
    MissingHash,
    #[error("signature mismatch")]
    BadSignature,
    #[error("auth_date missing or invalid")]
    BadAuthDate,
    #[error("init data expired")]
    Expired,
}

/// Verify an `initData` payload against the bot token.
///
/// `max_age_seconds <= 0` disables the freshness check.
pub fn verify_init_data(
    init_data: &str,
    bot_token: &str,
    max_age_seconds: i64,
) -> Result<InitData, VerifyError> {
    verify_init_data_at(
        init_data,
        bot_token,
        max_age_seconds,
        chrono::Utc::now().timestamp(),
    )
}

/// As [`verify_init_data`], with an explicit clock for testability.
pub fn verify_init_data_at(
    init_data: &str,
    bot_token: &str,
    max_age_seconds: i64,
    now_unix: i64,
) -> Result<InitData, VerifyError> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let hash_hex = pairs
        .iter()
        .find(|(k, _)| k == "hash")
        .map(|(_, v)| v.clone())
        .ok_or(VerifyError::MissingHash)?;
    let supplied = hex::decode(&hash_hex).map_err(|_| VerifyError::BadSignature)?;

    let mut check_lines: Vec<String> = pairs
        .iter()
        .filter(|(k, _)| k != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    check_lines.sort();
    let data_check_string = check_lines.join("\n");

    // First pass keys the bot token under the fixed "WebAppData" label, the
    // second pass signs the data-check string with that derived key.
    let secret = keyed_digest(b"WebAppData", bot_token.as_bytes());
    let mut mac = HmacSha256::new_from_slice(&secret).expect("HMAC can take key of any size");
    mac.update(data_check_string.as_bytes());
    // Constant-time comparison; must not leak how far the digest matched.
    mac.verify_slice(&supplied)
        .map_err(|_| VerifyError::BadSignature)?;

    let auth_date: i64 = pairs
        .iter()
        .find(|(k, _)| k == "auth_date")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    if auth_date <= 0 {
        return Err(VerifyError::BadAuthDate);
    }
    if max_age_seconds > 0 && now_unix - auth_date > max_age_seconds {
        return Err(VerifyError::Expired);
    }

    let user = pairs
        .iter()
        .find(|(k, _)| k == "user")
        .and_then(|(_, v)| serde_json::from_str(v).ok());

    Ok(InitData { user, auth_date })
}

fn keyed_digest(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "12345:TEST_TOKEN";

    /// Build a signed initData string the way Telegram does.
    fn signed(pairs: &[(&str, &str)], token: &str) -> String {
        let mut lines: Vec<String> =
            pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        lines.sort();
        let dcs = lines.join("\n");

        let secret = keyed_digest(b"WebAppData", token.as_bytes());
        let digest = keyed_digest(&secret, dcs.as_bytes());
        let hash = hex::encode(digest);

        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            ser.append_pair(k, v);
        }
        ser.append_pair("hash", &hash);
        ser.finish()
    }

    #[test]
    fn valid_payload_verifies_and_extracts_user() {
        let user = r#"{"id":1001,"first_name":"Ann","username":"ann"}"#;
        let init = signed(&[("auth_date", "1700000000"), ("user", user)], TOKEN);

        let v = verify_init_data_at(&init, TOKEN, 86400, 1700000100).unwrap();
        assert_eq!(v.auth_date, 1700000000);
        let u = v.user.unwrap();
        assert_eq!(u.id, 1001);
        assert_eq!(u.username.as_deref(), Some("ann"));
    }

    #[test]
    fn tampered_field_fails() {
        let init = signed(&[("auth_date", "1700000000"), ("query_id", "q1")], TOKEN);
        let tampered = init.replace("q1", "q2");
        assert_eq!(
            verify_init_data_at(&tampered, TOKEN, 0, 1700000100),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn tampered_hash_fails() {
        let init = signed(&[("auth_date", "1700000000")], TOKEN);
        // Flip one hex digit of the hash.
        let pos = init.len() - 1;
        let last = init.as_bytes()[pos];
        let flipped = if last == b'0' { '1' } else { '0' };
        let mut tampered = init[..pos].to_string();
        tampered.push(flipped);
        assert_eq!(
            verify_init_data_at(&tampered, TOKEN, 0, 1700000100),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn wrong_token_fails() {
        let init = signed(&[("auth_date", "1700000000")], TOKEN);
        assert_eq!(
            verify_init_data_at(&init, "other:token", 0, 1700000100),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn missing_hash_fails() {
        assert_eq!(
            verify_init_data_at("auth_date=1700000000", TOKEN, 0, 1700000100),
            Err(VerifyError::MissingHash)
        );
    }

    #[test]
    fn missing_auth_date_fails() {
        let init = signed(&[("query_id", "q1")], TOKEN);
        assert_eq!(
            verify_init_data_at(&init, TOKEN, 0, 1700000100),
            Err(VerifyError::BadAuthDate)
        );
    }

    #[test]
    fn stale_payload_fails_and_zero_ttl_disables_check() {
        let init = signed(&[("auth_date", "1700000000")], TOKEN);
        assert_eq!(
            verify_init_data_at(&init, TOKEN, 60, 1700000000 + 61),
            Err(VerifyError::Expired)
        );
        assert!(verify_init_data_at(&init, TOKEN, 0, 1700000000 + 61).is_ok());
    }

    #[test]
    fn malformed_user_record_is_tolerated() {
        let init = signed(
            &[("auth_date", "1700000000"), ("user", "{not-json")],
            TOKEN,
        );
        let v = verify_init_data_at(&init, TOKEN, 0, 1700000100).unwrap();
        assert!(v.user.is_none());
    }
}
