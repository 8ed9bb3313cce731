//! JWT payload decoding.
//!
//! The client never verifies signatures; it only reads the payload to find out
//! whether the server managed to attach a session to the token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClientError, ClientResult};

/// Claims carried by a login token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Encrypted session identifier; absent when the session cookie was not sent.
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Value>,

    /// Everything else in the payload (`user`, `iat`, `exp`, ...).
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl TokenClaims {
    /// True if the token references a server session.
    ///
    /// Null, `false`, `0` and the empty string count as missing.
    pub fn has_session(&self) -> bool {
        match &self.session_id {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(true),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        }
    }

    /// Expiry timestamp (`exp`, seconds since epoch) if present.
    pub fn expires_at(&self) -> Option<u64> {
        self.other.get("exp").and_then(Value::as_u64)
    }
}

/// Decode the payload segment of a JWT without verifying it.
pub fn decode_claims(token: &str) -> ClientResult<TokenClaims> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ClientError::InvalidToken("missing payload segment".to_string()))?;

    // Tolerate padded and standard-alphabet encoders.
    let normalized: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| ClientError::InvalidToken(format!("payload is not base64url: {e}")))?;

    let claims: TokenClaims = serde_json::from_slice(&bytes)
        .map_err(|e| ClientError::InvalidToken(format!("payload is not a JSON object: {e}")))?;

    Ok(claims)
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{header}.{body}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_session_claim() {
        let token = encode_test_token(&json!({ "sessionID": "abc123", "exp": 1700000000u64 }));
        let claims = decode_claims(&token).unwrap();

        assert!(claims.has_session());
        assert_eq!(claims.session_id, Some(json!("abc123")));
        assert_eq!(claims.expires_at(), Some(1700000000));
    }

    #[test]
    fn test_falsy_session_claims() {
        for value in [json!(null), json!(""), json!(false), json!(0)] {
            let token = encode_test_token(&json!({ "sessionID": value }));
            let claims = decode_claims(&token).unwrap();
            assert!(!claims.has_session(), "{value} should not count as a session");
        }

        let token = encode_test_token(&json!({ "user": { "uri": "x" } }));
        assert!(!decode_claims(&token).unwrap().has_session());
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let body = base64::engine::general_purpose::URL_SAFE.encode(br#"{"sessionID":"s"}"#);
        let token = format!("h.{body}.s");
        assert!(decode_claims(&token).unwrap().has_session());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            decode_claims("not-a-jwt"),
            Err(ClientError::InvalidToken(_))
        ));
        assert!(matches!(
            decode_claims("a.!!!.c"),
            Err(ClientError::InvalidToken(_))
        ));

        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert!(matches!(
            decode_claims(&format!("a.{not_json}.c")),
            Err(ClientError::InvalidToken(_))
        ));
    }
}
