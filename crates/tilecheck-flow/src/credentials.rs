//! Earthdata credentials.
//!
//! A batch starts a [`CredentialSession`], which acquires the Earthdata login
//! once through a [`CredentialProvider`]. Files behind `s3://` links also need
//! temporary AWS keys issued per data provider; the session fetches those
//! lazily, at most once per provider, and hands each unit the credentials
//! scoped to its provider. Secrets are wrapped in [`Redacted`] so they never
//! reach logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tilecheck_core::observability::Redacted;

use crate::error::{Error, Result};

/// Environment variable holding a bearer token.
pub const ENV_TOKEN: &str = "EARTHDATA_TOKEN";
/// Environment variable holding the login name.
pub const ENV_USERNAME: &str = "EARTHDATA_USERNAME";
/// Environment variable holding the password.
pub const ENV_PASSWORD: &str = "EARTHDATA_PASSWORD";

/// Attempts per S3 key request.
const S3_ATTEMPTS: u32 = 3;
/// Pause between S3 key attempts.
const S3_RETRY_WAIT: Duration = Duration::from_secs(1);

/// Returns the S3 credentials endpoint of a data provider.
///
/// Accepts both catalog provider ids (`LPCLOUD`) and DAAC short names (`LPDAAC`).
#[must_use]
pub fn s3_credentials_endpoint(provider: &str) -> Option<&'static str> {
    let endpoint = match provider.trim().to_ascii_uppercase().as_str() {
        "PODAAC" | "POCLOUD" | "NASA/JPL/PODAAC" => "https://archive.podaac.earthdata.nasa.gov/s3credentials",
        "LPDAAC" | "LPCLOUD" | "LP DAAC" => "https://data.lpdaac.earthdatacloud.nasa.gov/s3credentials",
        "NSIDC" | "NSIDC_CPRD" | "NSIDC_ECS" | "NASA NSIDC DAAC" => {
            "https://data.nsidc.earthdatacloud.nasa.gov/s3credentials"
        }
        "ORNLDAAC" | "ORNL_CLOUD" | "ORNL_DAAC" => "https://data.ornldaac.earthdata.nasa.gov/s3credentials",
        "GES_DISC" | "GESDISC" | "NASA/GSFC/SED/ESD/TISL/GESDISC" => {
            "https://data.gesdisc.earthdata.nasa.gov/s3credentials"
        }
        "GHRCDAAC" | "GHRC_DAAC" | "NASA/MSFC/GHRC" => "https://data.ghrc.earthdata.nasa.gov/s3credentials",
        "ASF" => "https://sentinel1.asf.alaska.edu/s3credentials",
        "LAADS" | "NASA/GSFC/SED/ESD/HBSL/BISB/LAADS" => {
            "https://data.laadsdaac.earthdatacloud.nasa.gov/s3credentials"
        }
        "OBDAAC" | "OB_CLOUD" | "NASA/GSFC/SED/ESD/GCDC/OB.DAAC" => {
            "https://obdaac-tea.earthdatacloud.nasa.gov/s3credentials"
        }
        "ASDC" | "LARC_CLOUD" | "NASA/LARC/SD/ASDC" => "https://data.asdc.earthdata.nasa.gov/s3credentials",
        _ => return None,
    };
    Some(endpoint)
}

/// Temporary AWS keys for one provider's buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Credentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: Redacted<String>,
    /// Session token.
    pub session_token: Option<Redacted<String>>,
    /// Expiry as reported by the provider.
    pub expiration: Option<String>,
}

impl S3Credentials {
    /// Creates keys without an expiry.
    #[must_use]
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Redacted::new(secret_access_key.into()),
            session_token: session_token.map(Redacted::new),
            expiration: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3CredentialsBody {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    expiration: Option<String>,
}

impl From<S3CredentialsBody> for S3Credentials {
    fn from(body: S3CredentialsBody) -> Self {
        Self {
            expiration: body.expiration,
            ..Self::new(body.access_key_id, body.secret_access_key, body.session_token)
        }
    }
}

/// Credentials for data providers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token, preferred when present.
    pub token: Option<Redacted<String>>,
    /// Login name.
    pub username: Option<String>,
    /// Password for `username`.
    pub password: Option<Redacted<String>>,
    /// AWS keys of the provider the credentials are scoped to.
    pub s3: Option<S3Credentials>,
}

impl Credentials {
    /// No credentials; only public data is reachable.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Credentials from a bearer token.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(Redacted::new(token.into())),
            ..Self::default()
        }
    }

    /// Credentials from a login.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(Redacted::new(password.into())),
            ..Self::default()
        }
    }

    /// Reads credentials from `EARTHDATA_TOKEN`, or `EARTHDATA_USERNAME` and
    /// `EARTHDATA_PASSWORD`. Blank values count as unset.
    #[must_use]
    pub fn from_env() -> Self {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(token) = read(ENV_TOKEN) {
            return Self::bearer(token);
        }
        match (read(ENV_USERNAME), read(ENV_PASSWORD)) {
            (Some(user), Some(pass)) => Self::basic(user, pass),
            _ => Self::anonymous(),
        }
    }

    /// Returns true if no Earthdata secret is available.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.token.is_none() && self.password.is_none()
    }

    /// Returns `user:password` when login credentials are set.
    #[must_use]
    pub fn userpwd(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some(format!("{user}:{}", pass.expose())),
            _ => None,
        }
    }
}

/// Acquires credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the Earthdata login, valid for the duration of one batch.
    async fn acquire(&self) -> Result<Credentials>;

    /// Returns temporary AWS keys for `provider`, or `None` if the provider
    /// issues none.
    async fn s3_credentials(&self, _provider: &str, _login: &Credentials) -> Result<Option<S3Credentials>> {
        Ok(None)
    }
}

/// Credentials of one batch.
///
/// Clones share the per-provider key cache.
#[derive(Clone)]
pub struct CredentialSession {
    provider: Arc<dyn CredentialProvider>,
    login: Credentials,
    s3: Arc<tokio::sync::Mutex<HashMap<String, Option<S3Credentials>>>>,
}

impl std::fmt::Debug for CredentialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSession")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

impl CredentialSession {
    /// Acquires the login and starts a session.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if the login cannot be acquired.
    pub async fn start(provider: Arc<dyn CredentialProvider>) -> Result<Self> {
        let login = provider.acquire().await?;
        Ok(Self::new(provider, login))
    }

    /// Creates a session around an already acquired login.
    #[must_use]
    pub fn new(provider: Arc<dyn CredentialProvider>, login: Credentials) -> Self {
        Self {
            provider,
            login,
            s3: Arc::default(),
        }
    }

    /// A session with no credentials at all.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(Arc::new(StaticCredentials::default()), Credentials::anonymous())
    }

    /// Returns the Earthdata login.
    #[must_use]
    pub const fn login(&self) -> &Credentials {
        &self.login
    }

    /// Returns the login plus the AWS keys of `provider`.
    ///
    /// Keys are requested once per provider for the life of the session. A
    /// failed request is logged and remembered; the unit proceeds without keys
    /// and its open fails on its own.
    pub async fn for_provider(&self, provider: Option<&str>) -> Credentials {
        let Some(provider) = provider else {
            return self.login.clone();
        };

        let mut cache = self.s3.lock().await;
        let s3 = match cache.get(provider) {
            Some(cached) => cached.clone(),
            None => {
                let fetched = match self.provider.s3_credentials(provider, &self.login).await {
                    Ok(keys) => keys,
                    Err(e) => {
                        tracing::warn!(provider, error = %e, "S3 credential request failed");
                        None
                    }
                };
                cache.insert(provider.to_string(), fetched.clone());
                fetched
            }
        };
        drop(cache);

        Credentials {
            s3,
            ..self.login.clone()
        }
    }
}

/// Reads the login from the environment and requests S3 keys from each
/// provider's credentials endpoint.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    client: Client,
}

impl EnvCredentials {
    /// Creates a provider whose key requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::credentials(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn request_keys(&self, endpoint: &str, login: &Credentials) -> Result<S3Credentials> {
        let mut request = self.client.get(endpoint);
        if let Some(token) = &login.token {
            request = request.bearer_auth(token.expose());
        } else if let (Some(user), Some(pass)) = (&login.username, &login.password) {
            request = request.basic_auth(user, Some(pass.expose()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::credentials(format!("request to {endpoint} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::credentials(format!("{endpoint} returned {status}")));
        }
        let body: S3CredentialsBody = response
            .json()
            .await
            .map_err(|e| Error::credentials(format!("unreadable response from {endpoint}: {e}")))?;
        Ok(body.into())
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn acquire(&self) -> Result<Credentials> {
        let creds = Credentials::from_env();
        if creds.is_anonymous() {
            tracing::warn!("no Earthdata credentials in environment; protected data will fail to open");
        }
        Ok(creds)
    }

    async fn s3_credentials(&self, provider: &str, login: &Credentials) -> Result<Option<S3Credentials>> {
        if login.is_anonymous() {
            return Ok(None);
        }
        let Some(endpoint) = s3_credentials_endpoint(provider) else {
            tracing::debug!(provider, "provider has no S3 credentials endpoint");
            return Ok(None);
        };

        let mut attempt = 1;
        loop {
            match self.request_keys(endpoint, login).await {
                Ok(keys) => {
                    tracing::debug!(provider, expiration = ?keys.expiration, "S3 credentials acquired");
                    return Ok(Some(keys));
                }
                Err(e) if attempt < S3_ATTEMPTS => {
                    tracing::debug!(provider, attempt, error = %e, "S3 credential request failed; retrying");
                    attempt += 1;
                    tokio::time::sleep(S3_RETRY_WAIT).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Hands out fixed credentials and counts acquisitions.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: Credentials,
    s3: HashMap<String, S3Credentials>,
    acquisitions: Arc<AtomicUsize>,
    s3_requests: Arc<Mutex<Vec<String>>>,
}

impl StaticCredentials {
    /// Creates a provider for `credentials`.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            ..Self::default()
        }
    }

    /// Issues `keys` for `provider`.
    #[must_use]
    pub fn with_s3(mut self, provider: impl Into<String>, keys: S3Credentials) -> Self {
        self.s3.insert(provider.into(), keys);
        self
    }

    /// Returns how many times credentials were acquired.
    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Returns the providers S3 keys were requested for, in request order.
    #[must_use]
    pub fn s3_requests(&self) -> Vec<String> {
        self.s3_requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn acquire(&self) -> Result<Credentials> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(self.credentials.clone())
    }

    async fn s3_credentials(&self, provider: &str, _login: &Credentials) -> Result<Option<S3Credentials>> {
        if let Ok(mut requests) = self.s3_requests.lock() {
            requests.push(provider.to_string());
        }
        Ok(self.s3.get(provider).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(id: &str) -> S3Credentials {
        S3Credentials::new(id, "secret-key", Some("session".into()))
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let mut creds = Credentials::basic("alice", "s3cret");
        creds.s3 = Some(keys("AKIA1"));
        let debug = format!("{creds:?}");
        assert!(debug.contains("alice"));
        assert!(debug.contains("AKIA1"));
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("secret-key"));
        assert_eq!(creds.userpwd().as_deref(), Some("alice:s3cret"));
    }

    #[test]
    fn anonymous_has_no_secret() {
        assert!(Credentials::anonymous().is_anonymous());
        assert!(!Credentials::bearer("t").is_anonymous());
        assert_eq!(Credentials::bearer("t").userpwd(), None);
    }

    #[test]
    fn endpoints_resolve_provider_ids_and_daac_names() {
        assert_eq!(
            s3_credentials_endpoint("LPCLOUD"),
            Some("https://data.lpdaac.earthdatacloud.nasa.gov/s3credentials")
        );
        assert_eq!(s3_credentials_endpoint("lp daac"), s3_credentials_endpoint("LPDAAC"));
        assert_eq!(s3_credentials_endpoint("POCLOUD"), s3_credentials_endpoint("PODAAC"));
        assert_eq!(s3_credentials_endpoint("SOMEWHERE"), None);
    }

    #[test]
    fn provider_response_parses() {
        let body: S3CredentialsBody = serde_json::from_str(
            r#"{"accessKeyId":"AKIA2","secretAccessKey":"sk","sessionToken":"st","expiration":"2024-01-01 00:00:00+00:00"}"#,
        )
        .unwrap();
        let keys = S3Credentials::from(body);
        assert_eq!(keys.access_key_id, "AKIA2");
        assert_eq!(keys.secret_access_key.expose(), "sk");
        assert_eq!(keys.session_token.as_ref().map(|t| t.expose().as_str()), Some("st"));
        assert_eq!(keys.expiration.as_deref(), Some("2024-01-01 00:00:00+00:00"));
    }

    #[tokio::test]
    async fn static_provider_counts() {
        let provider = StaticCredentials::new(Credentials::bearer("t"));
        provider.acquire().await.unwrap();
        provider.acquire().await.unwrap();
        assert_eq!(provider.acquisitions(), 2);
    }

    #[tokio::test]
    async fn session_fetches_keys_once_per_provider() {
        let provider = StaticCredentials::new(Credentials::bearer("t"))
            .with_s3("LPCLOUD", keys("AKIA-LP"))
            .with_s3("POCLOUD", keys("AKIA-PO"));
        let session = CredentialSession::start(Arc::new(provider.clone())).await.unwrap();

        let lp = session.for_provider(Some("LPCLOUD")).await;
        assert_eq!(lp.s3.as_ref().map(|k| k.access_key_id.as_str()), Some("AKIA-LP"));
        assert_eq!(lp.token, session.login().token);

        let again = session.clone().for_provider(Some("LPCLOUD")).await;
        assert_eq!(again, lp);
        let po = session.for_provider(Some("POCLOUD")).await;
        assert_eq!(po.s3.as_ref().map(|k| k.access_key_id.as_str()), Some("AKIA-PO"));

        let unknown = session.for_provider(Some("OTHER")).await;
        assert!(unknown.s3.is_none());
        session.for_provider(Some("OTHER")).await;
        assert!(session.for_provider(None).await.s3.is_none());

        assert_eq!(provider.acquisitions(), 1);
        assert_eq!(provider.s3_requests(), vec!["LPCLOUD", "POCLOUD", "OTHER"]);
    }

    #[tokio::test]
    async fn anonymous_login_requests_no_keys() {
        let provider = EnvCredentials::new(Duration::from_secs(1)).unwrap();
        let keys = provider
            .s3_credentials("LPCLOUD", &Credentials::anonymous())
            .await
            .unwrap();
        assert!(keys.is_none());
    }
}
