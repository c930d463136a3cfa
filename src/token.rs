//! Compact bearer-token issuance and verification.
//!
//! Tokens are three-part `header.claims.signature` strings, base64url
//! encoded without padding, signed with HMAC-SHA256 under a single
//! process-wide secret. Key rotation is out of scope; revocation is the
//! session manager's job, since sessions are the source of truth for
//! "is this login still valid".

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_ALG: &str = "HS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: TOKEN_ALG.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Signed payload: subject (user id), role, session id, and expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: String,
    pub role: String,
    pub sid: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid signing key")]
    Key,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Signs and verifies access tokens under one symmetric secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: SecretString,
    issuer: String,
    ttl_seconds: i64,
}

impl TokenSigner {
    #[must_use]
    pub fn new(secret: SecretString, issuer: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            secret,
            issuer: issuer.into(),
            ttl_seconds,
        }
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).map_err(|_| Error::Key)
    }

    /// Issue a signed token for one session.
    ///
    /// # Errors
    /// Returns an error if claims cannot be encoded or the key is unusable.
    pub fn issue(
        &self,
        user_id: Uuid,
        role: &str,
        session_id: Uuid,
        now_unix_seconds: i64,
    ) -> Result<String, Error> {
        let claims = AccessClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            sid: session_id.to_string(),
            iss: self.issuer.clone(),
            iat: now_unix_seconds,
            exp: now_unix_seconds + self.ttl_seconds,
        };

        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(signature.as_slice());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify signature integrity and expiry, returning the decoded claims.
    ///
    /// # Errors
    /// `Expired` is distinct from the malformed/signature family because
    /// callers may refresh an expired token but must hard-fail the rest.
    pub fn verify(&self, token: &str, now_unix_seconds: i64) -> Result<AccessClaims, Error> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
        if parts.next().is_some() {
            return Err(Error::TokenFormat);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != TOKEN_ALG {
            return Err(Error::UnsupportedAlg(header.alg));
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidSignature)?;

        let claims: AccessClaims = b64d_json(claims_b64)?;
        if claims.iss != self.issuer {
            return Err(Error::InvalidIssuer);
        }
        if claims.exp <= now_unix_seconds {
            return Err(Error::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{Error, TokenSigner};
    use secrecy::SecretString;
    use uuid::Uuid;

    // Fixed instant for stable expiry arithmetic.
    const NOW: i64 = 1_700_000_000;

    fn signer(ttl_seconds: i64) -> TokenSigner {
        TokenSigner::new(
            SecretString::from("test-signing-secret".to_string()),
            "sentinela-test",
            ttl_seconds,
        )
    }

    #[test]
    fn issue_then_verify_round_trip() {
        let signer = signer(120);
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let token = signer.issue(user_id, "operator", session_id, NOW).unwrap();

        assert_eq!(token.split('.').count(), 3);

        let claims = signer.verify(&token, NOW).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.sid, session_id.to_string());
        assert_eq!(claims.role, "operator");
        assert_eq!(claims.exp, NOW + 120);
    }

    #[test]
    fn verify_rejects_past_expiry() {
        let signer = signer(120);
        let token = signer
            .issue(Uuid::new_v4(), "viewer", Uuid::new_v4(), NOW)
            .unwrap();
        let result = signer.verify(&token, NOW + 121);
        assert!(matches!(result, Err(Error::Expired)));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let signer = signer(120);
        let token = signer
            .issue(Uuid::new_v4(), "viewer", Uuid::new_v4(), NOW)
            .unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = parts[1].to_string().replace(
            parts[1].chars().next().unwrap(),
            if parts[1].starts_with('A') { "B" } else { "A" },
        );
        parts[1] = &forged;
        let tampered = parts.join(".");
        let result = signer.verify(&tampered, NOW);
        assert!(matches!(
            result,
            Err(Error::InvalidSignature | Error::Json(_) | Error::Base64)
        ));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let token = signer(120)
            .issue(Uuid::new_v4(), "viewer", Uuid::new_v4(), NOW)
            .unwrap();
        let other = TokenSigner::new(
            SecretString::from("different-secret".to_string()),
            "sentinela-test",
            120,
        );
        assert!(matches!(
            other.verify(&token, NOW),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn verify_rejects_wrong_issuer() {
        let token = signer(120)
            .issue(Uuid::new_v4(), "viewer", Uuid::new_v4(), NOW)
            .unwrap();
        let other = TokenSigner::new(
            SecretString::from("test-signing-secret".to_string()),
            "someone-else",
            120,
        );
        assert!(matches!(
            other.verify(&token, NOW),
            Err(Error::InvalidIssuer)
        ));
    }

    #[test]
    fn verify_rejects_malformed_strings() {
        let signer = signer(120);
        assert!(matches!(
            signer.verify("not-a-token", NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            signer.verify("a.b", NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            signer.verify("a.b.c.d", NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            signer.verify("!!.@@.##", NOW),
            Err(Error::Base64)
        ));
    }
}
