use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::Error;

/// Claims carried in a Keycloak access token.
///
/// Parsed for display and expiry bookkeeping only. The signature is not
/// checked here; the identity provider and resource servers own that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiration time (Unix timestamp).
    #[serde(default)]
    pub exp: Option<i64>,
    /// Issued at (Unix timestamp).
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Everything else (`realm_access`, `azp`, custom mappers, ...).
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl TokenClaims {
    /// Gets a claim not covered by the typed fields.
    #[must_use]
    pub fn get_claim(&self, key: &str) -> Option<&JsonValue> {
        self.extra.get(key)
    }

    /// True if the token expires within `secs` seconds of `now` (Unix time).
    ///
    /// A token without `exp` never expires.
    #[must_use]
    pub fn expires_within(&self, secs: u64, now: i64) -> bool {
        let margin = i64::try_from(secs).unwrap_or(i64::MAX);
        self.exp.is_some_and(|exp| exp.saturating_sub(now) <= margin)
    }

    /// Seconds from `now` until `exp`, clamped at zero.
    #[must_use]
    pub fn seconds_until_expiry(&self, now: i64) -> Option<u64> {
        self.exp
            .map(|exp| u64::try_from(exp.saturating_sub(now)).unwrap_or(0))
    }
}

/// Decodes the payload segment of a compact JWT without verifying it.
///
/// # Errors
///
/// Returns `Error::Token` if the token is not three dot-separated segments,
/// the payload is not base64url, or it is not a JSON object.
pub fn parse_claims(token: &str) -> Result<TokenClaims, Error> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Token("invalid token format".into()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| Error::Token("invalid payload encoding".into()))?;

    serde_json::from_slice(&bytes).map_err(|e| Error::Token(format!("invalid payload: {e}")))
}

/// Current Unix time in seconds.
pub(crate) fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: &JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
