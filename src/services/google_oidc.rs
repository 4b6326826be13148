// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google Sign-In ID token verification.
//!
//! The browser obtains an ID token (the "credential") from Google Identity
//! Services and posts it to us. We check the RS256 signature against
//! Google's published JWKS, the issuer, and that the audience is our OAuth
//! client id, then extract the identity claims.

use crate::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

const DISCOVERY_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";
const DEFAULT_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;
/// Unknown kids trigger at most one forced JWKS refetch per interval.
const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Identity asserted by a verified Google ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleIdentity {
    /// Stable Google account id (`sub`)
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// OIDC verification error categories.
#[derive(Debug, Clone)]
pub enum OidcError {
    /// The credential is malformed, badly signed, or its claims do not match.
    Forbidden(String),
    /// Google's key endpoints could not be reached or returned garbage.
    Transient(String),
}

impl std::fmt::Display for OidcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OidcError::Forbidden(reason) => write!(f, "rejected: {reason}"),
            OidcError::Transient(reason) => write!(f, "unavailable: {reason}"),
        }
    }
}

/// Turns a client-supplied credential into a trusted identity.
#[async_trait]
pub trait IdTokenVerifier: Send + Sync {
    async fn verify_id_token(&self, credential: &str) -> Result<GoogleIdentity, OidcError>;
}

#[derive(Clone)]
enum VerifierMode {
    Google,
    StaticKey {
        kid: String,
        algorithm: Algorithm,
        decoding_key: Arc<DecodingKey>,
    },
}

#[derive(Clone)]
struct DiscoveryCacheEntry {
    jwks_uri: String,
    expires_at: Instant,
}

#[derive(Clone)]
struct JwksCacheEntry {
    keys_by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Verifier for Google Sign-In ID tokens.
pub struct GoogleOidcVerifier {
    http_client: reqwest::Client,
    client_id: String,
    mode: VerifierMode,
    discovery_cache: RwLock<Option<DiscoveryCacheEntry>>,
    jwks_cache: RwLock<Option<JwksCacheEntry>>,
    refresh_lock: Mutex<()>,
    last_forced_refresh: Mutex<Option<Instant>>,
}

impl GoogleOidcVerifier {
    /// Create a production verifier that discovers and caches Google JWKS keys.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let verifier = Self::with_mode(config, VerifierMode::Google)?;

        tracing::info!(
            client_id = %verifier.client_id,
            "Initialized Google Sign-In verifier"
        );

        Ok(verifier)
    }

    /// Create a verifier that trusts one fixed key instead of Google's JWKS.
    ///
    /// For local runs and tests, where credentials are minted in-process.
    pub fn new_with_static_key(
        config: &Config,
        kid: impl Into<String>,
        algorithm: Algorithm,
        decoding_key: DecodingKey,
    ) -> anyhow::Result<Self> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            anyhow::bail!("static OIDC kid must not be empty");
        }

        Self::with_mode(
            config,
            VerifierMode::StaticKey {
                kid,
                algorithm,
                decoding_key: Arc::new(decoding_key),
            },
        )
    }

    fn with_mode(config: &Config, mode: VerifierMode) -> anyhow::Result<Self> {
        let client_id = config.google_client_id.trim().to_string();
        if client_id.is_empty() {
            anyhow::bail!("Google client id must not be empty");
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building OIDC HTTP client")?;

        Ok(Self {
            http_client,
            client_id,
            mode,
            discovery_cache: RwLock::new(None),
            jwks_cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            last_forced_refresh: Mutex::new(None),
        })
    }

    fn expected_algorithm(&self) -> Algorithm {
        match &self.mode {
            VerifierMode::Google => Algorithm::RS256,
            VerifierMode::StaticKey { algorithm, .. } => *algorithm,
        }
    }

    async fn decoding_key_for_kid(&self, kid: &str) -> Result<Arc<DecodingKey>, OidcError> {
        if let VerifierMode::StaticKey {
            kid: static_kid,
            decoding_key,
            ..
        } = &self.mode
        {
            return if kid == static_kid {
                Ok(decoding_key.clone())
            } else {
                Err(OidcError::Forbidden(format!("unknown JWT kid: {kid}")))
            };
        }

        if let Some(key) = self.lookup_cached_key(kid).await {
            return Ok(key);
        }

        self.refresh_jwks(false).await?;
        if let Some(key) = self.lookup_cached_key(kid).await {
            return Ok(key);
        }

        // Google rotates keys, so an unknown kid may force a refetch, but
        // the credential is unauthenticated input: cap how often.
        if !self.claim_forced_refresh(Instant::now()).await {
            tracing::debug!(kid = %kid, "Unknown JWT kid; forced JWKS refresh throttled");
            return Err(OidcError::Forbidden(format!("unknown JWT kid: {kid}")));
        }

        self.refresh_jwks(true).await?;
        self.lookup_cached_key(kid).await.ok_or_else(|| {
            OidcError::Forbidden(format!("JWT kid not found in JWKS after refresh: {kid}"))
        })
    }

    /// Reserve the forced-refresh slot if the last one is old enough.
    async fn claim_forced_refresh(&self, now: Instant) -> bool {
        let mut last = self.last_forced_refresh.lock().await;
        if !forced_refresh_due(*last, now) {
            return false;
        }
        *last = Some(now);
        true
    }

    async fn lookup_cached_key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        let cache = self.jwks_cache.read().await;
        let now = Instant::now();
        cache
            .as_ref()
            .filter(|entry| entry.expires_at > now)
            .and_then(|entry| entry.keys_by_kid.get(kid))
            .cloned()
    }

    async fn refresh_jwks(&self, force_refresh: bool) -> Result<(), OidcError> {
        let _guard = self.refresh_lock.lock().await;

        if !force_refresh {
            let cache = self.jwks_cache.read().await;
            if cache
                .as_ref()
                .is_some_and(|entry| entry.expires_at > Instant::now())
            {
                return Ok(());
            }
        }

        let jwks_uri = self.resolve_jwks_uri(force_refresh).await;
        tracing::debug!(jwks_uri = %jwks_uri, "Refreshing Google JWKS cache");

        let response = self
            .http_client
            .get(&jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::Transient(format!("JWKS request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::Transient(format!(
                "JWKS request returned status {}",
                response.status()
            )));
        }

        let ttl = cache_ttl_from_headers(response.headers(), DEFAULT_CACHE_TTL);

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| OidcError::Transient(format!("invalid JWKS JSON: {e}")))?;

        let keys_by_kid = usable_rsa_keys(jwks);
        if keys_by_kid.is_empty() {
            return Err(OidcError::Transient(
                "JWKS response did not include any usable RSA keys".to_string(),
            ));
        }

        *self.jwks_cache.write().await = Some(JwksCacheEntry {
            keys_by_kid,
            expires_at: Instant::now() + ttl,
        });

        tracing::debug!(ttl_secs = ttl.as_secs(), "Google JWKS cache refreshed");
        Ok(())
    }

    /// JWKS location from discovery, falling back to the last known or
    /// well-known URI when discovery is unavailable.
    async fn resolve_jwks_uri(&self, force_refresh: bool) -> String {
        let cached = self.discovery_cache.read().await.clone();
        if !force_refresh {
            if let Some(entry) = cached
                .as_ref()
                .filter(|entry| entry.expires_at > Instant::now())
            {
                return entry.jwks_uri.clone();
            }
        }
        let fallback = cached
            .map(|entry| entry.jwks_uri)
            .unwrap_or_else(|| DEFAULT_JWKS_URL.to_string());

        let resp = match self.http_client.get(DISCOVERY_URL).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "OIDC discovery failed; using fallback JWKS URI");
                return fallback;
            }
            Err(e) => {
                tracing::warn!(error = %e, "OIDC discovery request failed; using fallback JWKS URI");
                return fallback;
            }
        };

        let ttl = cache_ttl_from_headers(resp.headers(), DEFAULT_CACHE_TTL);
        match resp.json::<OpenIdConfig>().await {
            Ok(discovery) => {
                *self.discovery_cache.write().await = Some(DiscoveryCacheEntry {
                    jwks_uri: discovery.jwks_uri.clone(),
                    expires_at: Instant::now() + ttl,
                });
                discovery.jwks_uri
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid OIDC discovery document");
                fallback
            }
        }
    }
}

#[async_trait]
impl IdTokenVerifier for GoogleOidcVerifier {
    async fn verify_id_token(&self, credential: &str) -> Result<GoogleIdentity, OidcError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(OidcError::Forbidden("credential is empty".to_string()));
        }

        let header = decode_header(credential)
            .map_err(|e| OidcError::Forbidden(format!("invalid JWT header: {e}")))?;

        let algorithm = self.expected_algorithm();
        if header.alg != algorithm {
            return Err(OidcError::Forbidden(format!(
                "unexpected JWT alg: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| OidcError::Forbidden("missing JWT kid".to_string()))?;

        let decoding_key = self.decoding_key_for_kid(&kid).await?;

        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.validate_nbf = true;
        validation.leeway = CLOCK_SKEW_SECS;

        let claims = decode::<GoogleIdTokenClaims>(credential, decoding_key.as_ref(), &validation)
            .map_err(|e| OidcError::Forbidden(format!("JWT validation failed: {e}")))?
            .claims;

        validate_iat(claims.iat)?;
        let identity = identity_from_claims(claims)?;

        tracing::debug!(
            subject = %identity.subject,
            email = %identity.email,
            "Google credential verified"
        );

        Ok(identity)
    }
}

#[derive(Debug, Deserialize)]
struct OpenIdConfig {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: String,
    e: String,
    #[serde(rename = "use")]
    use_: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleIdTokenClaims {
    sub: String,
    iat: Option<u64>,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

fn forced_refresh_due(last: Option<Instant>, now: Instant) -> bool {
    last.map_or(true, |at| {
        now.saturating_duration_since(at) >= MIN_FORCED_REFRESH_INTERVAL
    })
}

/// RS256 signing keys from a JWKS document, by kid.
fn usable_rsa_keys(jwks: Jwks) -> HashMap<String, Arc<DecodingKey>> {
    let mut keys_by_kid = HashMap::new();

    for jwk in jwks.keys {
        if jwk.kty != "RSA" || jwk.kid.trim().is_empty() {
            continue;
        }
        if jwk.alg.as_deref().is_some_and(|alg| alg != "RS256") {
            continue;
        }
        if jwk.use_.as_deref().is_some_and(|use_| use_ != "sig") {
            continue;
        }

        match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            Ok(key) => {
                keys_by_kid.insert(jwk.kid, Arc::new(key));
            }
            Err(e) => {
                tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid RSA JWKS key");
            }
        }
    }

    keys_by_kid
}

fn identity_from_claims(claims: GoogleIdTokenClaims) -> Result<GoogleIdentity, OidcError> {
    let email = claims
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| OidcError::Forbidden("missing email claim".to_string()))?;

    if claims.email_verified == Some(false) {
        return Err(OidcError::Forbidden(
            "email_verified claim is false".to_string(),
        ));
    }

    if claims.sub.trim().is_empty() {
        return Err(OidcError::Forbidden("empty sub claim".to_string()));
    }

    Ok(GoogleIdentity {
        subject: claims.sub,
        email,
        name: claims.name.filter(|n| !n.trim().is_empty()),
        picture: claims.picture.filter(|p| !p.trim().is_empty()),
    })
}

fn validate_iat(iat: Option<u64>) -> Result<(), OidcError> {
    let Some(iat) = iat else {
        return Err(OidcError::Forbidden("missing iat claim".to_string()));
    };

    if iat > now_unix_secs() + CLOCK_SKEW_SECS {
        return Err(OidcError::Forbidden(
            "iat claim is in the future".to_string(),
        ));
    }

    Ok(())
}

fn cache_ttl_from_headers(headers: &reqwest::header::HeaderMap, fallback: Duration) -> Duration {
    headers
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_cache_control_max_age)
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

fn parse_cache_control_max_age(value: &str) -> Option<u64> {
    value.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|raw| raw.trim_matches('"').parse::<u64>().ok())
    })
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
