//! Application default credentials
//!
//! Discovers an OAuth access token the same way the Google SDKs and the
//! Terraform provider do, without ever persisting credential material.
//! Sources, in order:
//!
//! 1. `GOOGLE_OAUTH_ACCESS_TOKEN`
//! 2. an `authorized_user` ADC file (`GOOGLE_APPLICATION_CREDENTIALS` or the
//!    gcloud well-known location), refreshed against the OAuth endpoint
//! 3. `gcloud auth application-default print-access-token`

use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::CloudError;
use crate::Result;

pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const USER_AGENT: &str = concat!("pastures/", env!("CARGO_PKG_VERSION"));

// Refresh this long before the reported expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);
const GCLOUD_TOKEN_TTL: Duration = Duration::from_secs(600);

/// Where access tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// A pre-minted token from the environment.
    Static(String),

    /// User credentials written by `gcloud auth application-default login`.
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },

    /// Delegate to the gcloud CLI (service account keys, external accounts).
    Gcloud,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AdcFile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// gcloud's well-known ADC location.
pub fn well_known_adc_path() -> Option<PathBuf> {
    if cfg!(windows) {
        dirs::config_dir().map(|d| d.join("gcloud").join("application_default_credentials.json"))
    } else {
        dirs::home_dir().map(|h| {
            h.join(".config")
                .join("gcloud")
                .join("application_default_credentials.json")
        })
    }
}

/// Pick a token source using `lookup` for environment variables.
pub fn discover_token_source<F>(lookup: F) -> Result<TokenSource>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = lookup(ACCESS_TOKEN_ENV).filter(|t| !t.trim().is_empty()) {
        debug!("Using access token from {}", ACCESS_TOKEN_ENV);
        return Ok(TokenSource::Static(token.trim().to_string()));
    }

    let explicit = lookup(CREDENTIALS_ENV).filter(|p| !p.is_empty()).map(PathBuf::from);
    let path = match explicit {
        Some(path) if !path.exists() => {
            return Err(CloudError::Auth(format!(
                "{} points at {}, which does not exist",
                CREDENTIALS_ENV,
                path.display()
            )));
        }
        Some(path) => Some(path),
        None => well_known_adc_path().filter(|p| p.exists()),
    };

    let Some(path) = path else {
        debug!("No ADC file found, falling back to gcloud");
        return Ok(TokenSource::Gcloud);
    };

    let content = std::fs::read_to_string(&path)?;
    let parsed: AdcFile = serde_json::from_str(&content).map_err(|e| {
        CloudError::Auth(format!("Malformed credentials file {}: {}", path.display(), e))
    })?;

    Ok(match parsed {
        AdcFile::AuthorizedUser {
            client_id,
            client_secret,
            refresh_token,
        } => TokenSource::AuthorizedUser {
            client_id,
            client_secret,
            refresh_token,
        },
        AdcFile::Other => TokenSource::Gcloud,
    })
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() + EXPIRY_SKEW < at,
            None => true,
        }
    }
}

/// Caching access-token provider backed by a [`TokenSource`].
pub struct AdcTokenProvider {
    source: TokenSource,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl AdcTokenProvider {
    pub fn new(source: TokenSource) -> Result<Self> {
        Ok(Self {
            source,
            http: http_client()?,
            cached: Mutex::new(None),
        })
    }

    pub fn source(&self) -> &TokenSource {
        &self.source
    }

    /// Return a valid bearer token, refreshing when needed.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = self.fetch().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch(&self) -> Result<CachedToken> {
        match &self.source {
            TokenSource::Static(token) => Ok(CachedToken {
                value: token.clone(),
                expires_at: None,
            }),
            TokenSource::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => {
                let response = self
                    .http
                    .post(TOKEN_URL)
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("refresh_token", refresh_token.as_str()),
                    ])
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(CloudError::Auth(format!(
                        "token refresh rejected ({}): {}",
                        status, body
                    )));
                }

                let token: TokenResponse = response.json().await?;
                Ok(CachedToken {
                    value: token.access_token,
                    expires_at: token
                        .expires_in
                        .map(|secs| Instant::now() + Duration::from_secs(secs)),
                })
            }
            TokenSource::Gcloud => {
                let output = Command::new("gcloud")
                    .args(["auth", "application-default", "print-access-token"])
                    .output()
                    .await
                    .map_err(|e| CloudError::Auth(format!("unable to run gcloud: {}", e)))?;

                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(CloudError::Auth(stderr.trim().to_string()));
                }

                let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if value.is_empty() {
                    return Err(CloudError::Auth("gcloud returned an empty token".to_string()));
                }
                Ok(CachedToken {
                    value,
                    expires_at: Some(Instant::now() + GCLOUD_TOKEN_TTL),
                })
            }
        }
    }

    /// Make a trivial authenticated call to confirm the token is accepted.
    pub async fn verify(&self) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(TOKENINFO_URL)
            .query(&[("access_token", token.as_str())])
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(CloudError::Auth(format!(
                "token rejected by tokeninfo ({}): {}",
                status, body
            )))
        }
    }
}

/// Shared HTTP client configuration for Google APIs.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| CloudError::Transport(e.to_string()))
}

/// Probe for ambient application default credentials.
///
/// Any failure, whatever its origin, is reported as [`CloudError::Auth`] with
/// the underlying diagnostic attached.
pub async fn app_default_credentials() -> Result<AdcTokenProvider> {
    let result = async {
        let source = discover_token_source(|key| std::env::var(key).ok())?;
        let provider = AdcTokenProvider::new(source)?;
        provider.verify().await?;
        Ok::<_, CloudError>(provider)
    }
    .await;

    match result {
        Ok(provider) => {
            info!("Application default credentials verified");
            Ok(provider)
        }
        Err(CloudError::Auth(msg)) => Err(CloudError::Auth(msg)),
        Err(other) => Err(CloudError::Auth(other.to_string())),
    }
}
