//! Provider token signing for token-based authentication

use crate::error::Error;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

#[cfg(feature = "openssl")]
use openssl::{
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    pkey::{PKey, Private},
    sign::Signer as SslSigner,
};

#[cfg(all(not(feature = "openssl"), feature = "ring"))]
use ring::{rand::SystemRandom, signature::EcdsaKeyPair};

#[cfg(not(any(feature = "openssl", feature = "ring")))]
compile_error!("either the `openssl` or the `ring` feature must be enabled");

#[cfg(feature = "openssl")]
type Secret = PKey<Private>;

#[cfg(all(not(feature = "openssl"), feature = "ring"))]
type Secret = EcdsaKeyPair;

/// APNs rejects provider tokens older than this.
pub const MAX_TOKEN_AGE: Duration = Duration::from_secs(60 * 60);

/// A signed provider token with the moment it was issued.
#[derive(Debug, Clone)]
pub(crate) struct ProviderToken {
    value: Arc<str>,
    issued_at: Instant,
}

impl ProviderToken {
    pub(crate) fn value(&self) -> &str {
        &self.value
    }

    pub(crate) fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// When APNs stops accepting the token.
    pub(crate) fn expires_at(&self) -> Instant {
        self.issued_at + MAX_TOKEN_AGE
    }
}

/// For signing requests when using token-based authentication. Re-uses the
/// same signature until it is older than the refresh threshold.
///
/// Clones share the cached token, so a client and its clones sign at most once
/// per threshold.
#[derive(Clone)]
pub struct Signer {
    signature: Arc<RwLock<Option<ProviderToken>>>,
    key_id: String,
    team_id: String,
    secret: Arc<Secret>,
    expire_after: Duration,
}

#[derive(Serialize)]
enum JwtAlg {
    ES256,
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: JwtAlg,
    kid: &'a str,
}

#[derive(Serialize)]
struct JwtPayload<'a> {
    iss: &'a str,
    iat: i64,
}

impl Signer {
    /// Creates a signer with a pkcs8 private key, APNs key id and team id.
    ///
    /// `signature_ttl` is the refresh threshold and must stay below the
    /// one hour APNs accepts a token for. Fails if the key is not a valid EC
    /// key or there is a problem with the crypto backend.
    pub fn new<S, T, R>(mut pk_pem: R, key_id: S, team_id: T, signature_ttl: Duration) -> Result<Signer, Error>
    where
        S: Into<String>,
        T: Into<String>,
        R: Read,
    {
        if signature_ttl >= MAX_TOKEN_AGE {
            return Err(Error::InvalidOptions(format!(
                "The signature TTL of {}s must be below the APNs token limit of {}s",
                signature_ttl.as_secs(),
                MAX_TOKEN_AGE.as_secs()
            )));
        }

        let mut pem_key: Vec<u8> = Vec::new();
        pk_pem.read_to_end(&mut pem_key)?;

        Ok(Signer {
            signature: Arc::new(RwLock::new(None)),
            key_id: key_id.into(),
            team_id: team_id.into(),
            secret: Arc::new(Self::parse_key(&pem_key)?),
            expire_after: signature_ttl,
        })
    }

    /// Take a signature out for usage. Automatically renews the signature
    /// if it's older than the expiration time.
    pub fn with_signature<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&str) -> T,
    {
        let token = self.token()?;

        Ok(f(token.value()))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// The cached token, renewed first when it has passed the refresh
    /// threshold. Concurrent callers wait on the write lock, so only one of
    /// them signs.
    pub(crate) fn token(&self) -> Result<ProviderToken, Error> {
        if let Some(token) = self.fresh(&self.signature.read()) {
            return Ok(token);
        }

        let mut signature = self.signature.write();

        if let Some(token) = self.fresh(&signature) {
            return Ok(token);
        }

        let token = self.renew()?;
        *signature = Some(token.clone());

        Ok(token)
    }

    fn fresh(&self, cached: &Option<ProviderToken>) -> Option<ProviderToken> {
        cached
            .as_ref()
            .filter(|token| token.issued_at.elapsed() < self.expire_after)
            .cloned()
    }

    fn renew(&self) -> Result<ProviderToken, Error> {
        let issued_at = Instant::now();
        let issued_at_unix = get_time();

        tracing::debug!(
            key_id = %self.key_id,
            team_id = %self.team_id,
            issued_at = issued_at_unix,
            valid_for_secs = self.expire_after.as_secs(),
            "renewing provider token"
        );

        let headers = JwtHeader {
            alg: JwtAlg::ES256,
            kid: &self.key_id,
        };

        let payload = JwtPayload {
            iss: &self.team_id,
            iat: issued_at_unix,
        };

        let encoded_header = URL_SAFE_NO_PAD.encode(serde_json::to_string(&headers)?);
        let encoded_payload = URL_SAFE_NO_PAD.encode(serde_json::to_string(&payload)?);
        let signing_input = format!("{}.{}", encoded_header, encoded_payload);

        let signature = self.sign(signing_input.as_bytes())?;
        let value = format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature));

        Ok(ProviderToken {
            value: value.into(),
            issued_at,
        })
    }

    #[cfg(feature = "openssl")]
    fn parse_key(pem_key: &[u8]) -> Result<Secret, Error> {
        let secret = PKey::private_key_from_pem(pem_key)?;
        // ES256 only
        secret.ec_key()?;

        Ok(secret)
    }

    #[cfg(all(not(feature = "openssl"), feature = "ring"))]
    fn parse_key(pem_key: &[u8]) -> Result<Secret, Error> {
        let der = pem::parse(pem_key)?;

        Ok(EcdsaKeyPair::from_pkcs8(
            &ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING,
            der.contents(),
            &SystemRandom::new(),
        )?)
    }

    /// ES256 signature as the raw `r || s` pair JWS expects.
    #[cfg(feature = "openssl")]
    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut signer = SslSigner::new(MessageDigest::sha256(), &self.secret)?;
        signer.update(input)?;

        let der = signer.sign_to_vec()?;
        let signature = EcdsaSig::from_der(&der)?;

        let mut raw = signature.r().to_vec_padded(32)?;
        raw.extend(signature.s().to_vec_padded(32)?);

        Ok(raw)
    }

    #[cfg(all(not(feature = "openssl"), feature = "ring"))]
    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let signature = self.secret.sign(&SystemRandom::new(), input)?;

        Ok(signature.as_ref().to_vec())
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("key_id", &self.key_id)
            .field("team_id", &self.team_id)
            .field("expire_after", &self.expire_after)
            .finish_non_exhaustive()
    }
}

fn get_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
