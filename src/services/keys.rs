//! Signing key generation and conversion
//!
//! Keys live as private JWKs. This module creates them, picks the signing
//! method a key supports, and turns JWK members into the encoding and
//! decoding keys `jsonwebtoken` signs and verifies with.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs1::EncodeRsaPrivateKey,
    traits::{PrivateKeyParts, PublicKeyParts},
    BigUint, RsaPrivateKey,
};
use uuid::Uuid;

use crate::models::Jwk;

/// Algorithms keys can be generated for
pub const SUPPORTED_ALGORITHMS: &[&str] =
    &["EdDSA", "ES256", "ES384", "RS256", "RS384", "RS512", "HS512"];

/// Random bytes in a generated HS512 secret
const HMAC_SECRET_BYTES: usize = 64;

pub fn is_supported_algorithm(alg: &str) -> bool {
    SUPPORTED_ALGORITHMS.contains(&alg)
}

/// Generate a private JWK for `alg` with a random UUID key id
pub fn generate_jwk(alg: &str) -> Result<Jwk> {
    let kid = Uuid::new_v4().to_string();

    match alg {
        "EdDSA" => Ok(generate_ed25519(kid)),
        "ES256" => Ok(generate_p256(kid)),
        "ES384" => Ok(generate_p384(kid)),
        "RS256" => generate_rsa(kid, alg, 2048),
        "RS384" => generate_rsa(kid, alg, 3072),
        "RS512" => generate_rsa(kid, alg, 4096),
        "HS512" => Ok(generate_hmac(kid)),
        other => bail!("Unsupported key algorithm: {other}"),
    }
}

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_ed25519(kid: String) -> Jwk {
    let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);

    let mut jwk = Jwk::new("OKP", kid, "EdDSA");
    jwk.crv = Some("Ed25519".to_string());
    jwk.x = Some(b64(signing_key.verifying_key().as_bytes()));
    jwk.d = Some(b64(&signing_key.to_bytes()));
    jwk
}

fn generate_p256(kid: String) -> Jwk {
    let signing_key = p256::ecdsa::SigningKey::random(&mut OsRng);
    let point = signing_key.verifying_key().to_encoded_point(false);

    let mut jwk = Jwk::new("EC", kid, "ES256");
    jwk.crv = Some("P-256".to_string());
    jwk.x = point.x().map(|x| b64(x));
    jwk.y = point.y().map(|y| b64(y));
    jwk.d = Some(b64(&signing_key.to_bytes()));
    jwk
}

fn generate_p384(kid: String) -> Jwk {
    let signing_key = p384::ecdsa::SigningKey::random(&mut OsRng);
    let point = signing_key.verifying_key().to_encoded_point(false);

    let mut jwk = Jwk::new("EC", kid, "ES384");
    jwk.crv = Some("P-384".to_string());
    jwk.x = point.x().map(|x| b64(x));
    jwk.y = point.y().map(|y| b64(y));
    jwk.d = Some(b64(&signing_key.to_bytes()));
    jwk
}

fn generate_rsa(kid: String, alg: &str, bits: usize) -> Result<Jwk> {
    let key = RsaPrivateKey::new(&mut OsRng, bits).context("Failed to generate RSA key")?;
    let [p, q] = key.primes() else {
        bail!("Generated RSA key does not have exactly two primes");
    };

    let mut jwk = Jwk::new("RSA", kid, alg);
    jwk.n = Some(b64(&key.n().to_bytes_be()));
    jwk.e = Some(b64(&key.e().to_bytes_be()));
    jwk.d = Some(b64(&key.d().to_bytes_be()));
    jwk.p = Some(b64(&p.to_bytes_be()));
    jwk.q = Some(b64(&q.to_bytes_be()));
    jwk.dp = key.dp().map(|v| b64(&v.to_bytes_be()));
    jwk.dq = key.dq().map(|v| b64(&v.to_bytes_be()));
    jwk.qi = key
        .crt_coefficient()
        .map(|v| b64(&v.to_bytes_be()));
    Ok(jwk)
}

fn generate_hmac(kid: String) -> Jwk {
    let mut secret = [0u8; HMAC_SECRET_BYTES];
    OsRng.fill_bytes(&mut secret);

    let mut jwk = Jwk::new("oct", kid, "HS512");
    jwk.k = Some(b64(&secret));
    jwk
}

fn member<'a>(jwk: &'a Jwk, value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .with_context(|| format!("JWK {} is missing member {name}", jwk.kid))
}

fn decode_member(jwk: &Jwk, value: &Option<String>, name: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(member(jwk, value, name)?)
        .with_context(|| format!("JWK {} member {name} is not base64url", jwk.kid))
}

/// Default signing method for a key, derived from its type
///
/// Ed25519 signs EdDSA, P-256/P-384 sign ES256/ES384 and RSA keys sign
/// RS256/RS384/RS512 by modulus size. Anything else signs HS512, except
/// P-521 keys, which have no usable method and yield `None`.
pub fn signing_method(jwk: &Jwk) -> Option<&'static str> {
    let method = match (jwk.kty.as_str(), jwk.crv.as_deref()) {
        ("OKP", Some("Ed25519")) => "EdDSA",
        ("EC", Some("P-256")) => "ES256",
        ("EC", Some("P-384")) => "ES384",
        ("EC", Some("P-521")) => return None,
        ("RSA", _) => match rsa_modulus_len(jwk) {
            Some(256) => "RS256",
            Some(384) => "RS384",
            Some(512) => "RS512",
            _ => "HS512",
        },
        _ => "HS512",
    };
    Some(method)
}

fn rsa_modulus_len(jwk: &Jwk) -> Option<usize> {
    let n = URL_SAFE_NO_PAD.decode(jwk.n.as_deref()?).ok()?;
    let leading_zeros = n.iter().take_while(|b| **b == 0).count();
    Some(n.len() - leading_zeros)
}

pub fn parse_algorithm(method: &str) -> Result<Algorithm> {
    Algorithm::from_str(method).with_context(|| format!("Unknown signing method: {method}"))
}

/// Private key for signing with `jsonwebtoken`
pub fn encoding_key(jwk: &Jwk) -> Result<EncodingKey> {
    match jwk.kty.as_str() {
        "OKP" => {
            let d = decode_member(jwk, &jwk.d, "d")?;
            let seed: [u8; 32] = d
                .as_slice()
                .try_into()
                .with_context(|| format!("JWK {} has an invalid Ed25519 seed", jwk.kid))?;
            let der = ed25519_pkcs8(&seed)?;
            Ok(EncodingKey::from_ed_der(&der))
        }
        "EC" => {
            let d = decode_member(jwk, &jwk.d, "d")?;
            let der = match jwk.crv.as_deref() {
                Some("P-256") => {
                    use p256::pkcs8::EncodePrivateKey;
                    p256::ecdsa::SigningKey::from_slice(&d)
                        .context("Invalid P-256 private key")?
                        .to_pkcs8_der()
                        .context("Failed to encode P-256 key")?
                        .as_bytes()
                        .to_vec()
                }
                Some("P-384") => {
                    use p384::pkcs8::EncodePrivateKey;
                    p384::ecdsa::SigningKey::from_slice(&d)
                        .context("Invalid P-384 private key")?
                        .to_pkcs8_der()
                        .context("Failed to encode P-384 key")?
                        .as_bytes()
                        .to_vec()
                }
                other => bail!("Signing with curve {other:?} is not supported"),
            };
            Ok(EncodingKey::from_ec_der(&der))
        }
        "RSA" => {
            let part = |value: &Option<String>, name: &str| -> Result<BigUint> {
                Ok(BigUint::from_bytes_be(&decode_member(jwk, value, name)?))
            };
            let key = RsaPrivateKey::from_components(
                part(&jwk.n, "n")?,
                part(&jwk.e, "e")?,
                part(&jwk.d, "d")?,
                vec![part(&jwk.p, "p")?, part(&jwk.q, "q")?],
            )
            .context("Invalid RSA key components")?;
            let der = key.to_pkcs1_der().context("Failed to encode RSA key")?;
            Ok(EncodingKey::from_rsa_der(der.as_bytes()))
        }
        "oct" => Ok(EncodingKey::from_secret(&decode_member(jwk, &jwk.k, "k")?)),
        other => bail!("Unsupported key type: {other}"),
    }
}

fn ed25519_pkcs8(seed: &[u8; 32]) -> Result<Vec<u8>> {
    use ed25519_dalek::pkcs8::EncodePrivateKey;

    let der = ed25519_dalek::SigningKey::from_bytes(seed)
        .to_pkcs8_der()
        .context("Failed to encode Ed25519 key")?;
    Ok(der.as_bytes().to_vec())
}

/// Verification key built from the public members only
pub fn decoding_key(jwk: &Jwk) -> Result<DecodingKey> {
    let key = match jwk.kty.as_str() {
        "OKP" => DecodingKey::from_ed_components(member(jwk, &jwk.x, "x")?),
        "EC" => DecodingKey::from_ec_components(
            member(jwk, &jwk.x, "x")?,
            member(jwk, &jwk.y, "y")?,
        ),
        "RSA" => DecodingKey::from_rsa_components(
            member(jwk, &jwk.n, "n")?,
            member(jwk, &jwk.e, "e")?,
        ),
        "oct" => Ok(DecodingKey::from_secret(&decode_member(jwk, &jwk.k, "k")?)),
        other => bail!("Unsupported key type: {other}"),
    };

    key.with_context(|| format!("Invalid public members in JWK {}", jwk.kid))
}
