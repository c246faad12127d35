use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Reads the `exp` claim of an access token.
///
/// The client never holds the signing key, so the signature is not checked;
/// the value is only used to schedule a refresh.
pub(crate) fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    data.claims
        .exp
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
}

/// Token expiry, falling back to `issued_at + lifetime` for opaque tokens.
pub(crate) fn expiry_or_default(token: &str, issued_at: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    decode_expiry(token).unwrap_or_else(|| {
        issued_at + ChronoDuration::from_std(lifetime).unwrap_or_else(|_| ChronoDuration::days(1))
    })
}

/// How long to wait before refreshing: `lead` ahead of expiry, never negative.
pub(crate) fn refresh_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, lead: Duration) -> Duration {
    let lead = ChronoDuration::from_std(lead).unwrap_or_else(|_| ChronoDuration::zero());
    (expires_at - lead - now).to_std().unwrap_or(Duration::ZERO)
}
