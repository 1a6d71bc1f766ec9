//! RS256-signed access and refresh tokens.
//!
//! Tokens are plain JWTs signed with an RSA private key; verification is
//! pinned to RS256 so a token claiming a symmetric algorithm can never reach
//! the signature check. Signing and verification are pure computations; the
//! key is supplied by the caller on every call.

use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey, errors::Error as RsaError};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

pub const REFRESH_TOKEN_TYPE: &str = "refresh";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn rs256() -> Self {
        Self {
            alg: "RS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims carried by a short-lived access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub org: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a long-lived refresh token. The type marker prevents a
/// refresh token from passing access-token verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshClaims {
    pub sub: String,
    pub typ: String,
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
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("rsa error")]
    Rsa(#[from] RsaError),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong token type")]
    WrongTokenType,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn decode_private_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey, Error> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| Error::KeyParse)?;
        if let Ok(k) = RsaPrivateKey::from_pkcs8_pem(s) {
            return Ok(k);
        }
        if let Ok(k) = RsaPrivateKey::from_pkcs1_pem(s) {
            return Ok(k);
        }
        return Err(Error::KeyParse);
    }

    if let Ok(k) = RsaPrivateKey::from_pkcs8_der(pem_or_der) {
        return Ok(k);
    }
    if let Ok(k) = RsaPrivateKey::from_pkcs1_der(pem_or_der) {
        return Ok(k);
    }
    Err(Error::KeyParse)
}

/// Sign claims as an RS256 JWT.
///
/// # Errors
///
/// Returns an error if the private key cannot be parsed, claims/header JSON
/// cannot be encoded, or signing fails.
pub fn sign_rs256<T: Serialize>(
    private_key_pem_or_der: &[u8],
    claims: &T,
) -> Result<String, Error> {
    let header = TokenHeader::rs256();
    let header_b64 = b64e_json(&header)?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let private_key = decode_private_key(private_key_pem_or_der)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

fn verify_rs256<T: for<'de> Deserialize<'de>>(
    token: &str,
    public_key: &RsaPublicKey,
) -> Result<T, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }

    // Algorithm is checked before anything else touches the signature; a
    // symmetric `alg` never reaches the RSA verifier.
    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != "RS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    b64d_json(claims_b64)
}

/// Verify an access token against the private key's public half and return
/// its claims.
///
/// # Errors
///
/// Returns an error if the token is malformed, signed with another key or
/// algorithm, expired at `now_unix_seconds`, or not an access token.
pub fn verify_access(
    token: &str,
    private_key_pem_or_der: &[u8],
    now_unix_seconds: i64,
) -> Result<AccessClaims, Error> {
    let public_key = RsaPublicKey::from(decode_private_key(private_key_pem_or_der)?);
    let claims: AccessClaims = verify_rs256(token, &public_key)?;
    if claims.exp <= now_unix_seconds {
        return Err(Error::Expired);
    }
    Ok(claims)
}

/// Verify a refresh token, including its type marker.
///
/// # Errors
///
/// Returns an error if the token fails signature/expiry checks or does not
/// carry the refresh type marker.
pub fn verify_refresh(
    token: &str,
    private_key_pem_or_der: &[u8],
    now_unix_seconds: i64,
) -> Result<RefreshClaims, Error> {
    let public_key = RsaPublicKey::from(decode_private_key(private_key_pem_or_der)?);
    let claims: RefreshClaims = verify_rs256(token, &public_key)?;
    if claims.typ != REFRESH_TOKEN_TYPE {
        return Err(Error::WrongTokenType);
    }
    if claims.exp <= now_unix_seconds {
        return Err(Error::Expired);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkeys::TEST_PRIVATE_KEY_PEM;

    const NOW: i64 = 1_700_000_000;

    fn access_claims() -> AccessClaims {
        AccessClaims {
            sub: "5f4c1c4a-6f62-4f11-9c8d-000000000001".to_string(),
            email: "a@x.com".to_string(),
            org: "5f4c1c4a-6f62-4f11-9c8d-000000000002".to_string(),
            role: "owner".to_string(),
            iat: NOW,
            exp: NOW + 3600,
        }
    }

    #[test]
    fn access_round_trip_preserves_identity_claims() -> Result<(), Error> {
        let claims = access_claims();
        let token = sign_rs256(TEST_PRIVATE_KEY_PEM.as_bytes(), &claims)?;
        let verified = verify_access(&token, TEST_PRIVATE_KEY_PEM.as_bytes(), NOW)?;
        assert_eq!(verified, claims);
        Ok(())
    }

    #[test]
    fn expired_access_token_fails_with_expiry_error() -> Result<(), Error> {
        let token = sign_rs256(TEST_PRIVATE_KEY_PEM.as_bytes(), &access_claims())?;
        let result = verify_access(&token, TEST_PRIVATE_KEY_PEM.as_bytes(), NOW + 3600);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn refresh_token_type_marker_enforced() -> Result<(), Error> {
        let claims = RefreshClaims {
            sub: "5f4c1c4a-6f62-4f11-9c8d-000000000001".to_string(),
            typ: REFRESH_TOKEN_TYPE.to_string(),
            iat: NOW,
            exp: NOW + 7 * 24 * 3600,
        };
        let token = sign_rs256(TEST_PRIVATE_KEY_PEM.as_bytes(), &claims)?;
        assert_eq!(
            verify_refresh(&token, TEST_PRIVATE_KEY_PEM.as_bytes(), NOW)?,
            claims
        );

        // An access token is not accepted where a refresh token is expected.
        let access = sign_rs256(TEST_PRIVATE_KEY_PEM.as_bytes(), &access_claims())?;
        let result = verify_refresh(&access, TEST_PRIVATE_KEY_PEM.as_bytes(), NOW);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn symmetric_algorithm_is_structurally_rejected() -> Result<(), Error> {
        // Forge a token whose header claims HS256; it must fail before any
        // signature computation.
        let header = serde_json::json!({"alg": "HS256", "typ": "JWT"});
        let header_b64 = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&header)?);
        let claims_b64 =
            Base64UrlUnpadded::encode_string(&serde_json::to_vec(&access_claims())?);
        let forged = format!("{header_b64}.{claims_b64}.AAAA");

        let result = verify_access(&forged, TEST_PRIVATE_KEY_PEM.as_bytes(), NOW);
        assert!(matches!(result, Err(Error::UnsupportedAlg(alg)) if alg == "HS256"));
        Ok(())
    }

    #[test]
    fn tampered_claims_fail_signature_check() -> Result<(), Error> {
        let token = sign_rs256(TEST_PRIVATE_KEY_PEM.as_bytes(), &access_claims())?;
        let mut parts: Vec<&str> = token.split('.').collect();
        let mut tampered = access_claims();
        tampered.role = "platform_admin".to_string();
        let forged_claims =
            Base64UrlUnpadded::encode_string(&serde_json::to_vec(&tampered)?);
        parts[1] = &forged_claims;
        let forged = parts.join(".");

        let result = verify_access(&forged, TEST_PRIVATE_KEY_PEM.as_bytes(), NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn malformed_tokens_rejected() {
        let result = verify_access("only.two", TEST_PRIVATE_KEY_PEM.as_bytes(), NOW);
        assert!(matches!(result, Err(Error::TokenFormat)));

        let result = verify_access("a.b.c.d", TEST_PRIVATE_KEY_PEM.as_bytes(), NOW);
        assert!(matches!(result, Err(Error::TokenFormat)));
    }
}
