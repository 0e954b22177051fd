//! OAuth2 authorization and the authenticated Gmail hub

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use yup_oauth2::authorized_user::AuthorizedUserSecret;
use yup_oauth2::ApplicationSecret;

use crate::config::{AuthConfig, QuotaConfig};
use crate::error::{GmailError, Result};
use crate::rate_limiter::QuotaRateLimiter;
use crate::transport::{GmailTransport, MAIL_SCOPE};

/// Scopes requested at authorization time; batchDelete needs the full mail scope
pub const REQUIRED_SCOPES: &[&str] = &[MAIL_SCOPE];

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// The only state persisted between runs: `{"refresh_token": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub refresh_token: String,
}

impl RefreshTokenRecord {
    /// `None` when no record has been written yet
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(path).await?;
        let record: Self = serde_json::from_str(&content)?;
        if record.refresh_token.trim().is_empty() {
            return Err(GmailError::AuthError(format!(
                "Refresh token record at {:?} is empty",
                path
            )));
        }
        Ok(Some(record))
    }

    /// Write the record readable by the owner only
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(self)?).await?;
        secure_token_file(path).await
    }

    /// Pull the refresh token out of a yup-oauth2 token cache file
    pub fn from_token_cache(content: &str) -> Result<Self> {
        let cache: serde_json::Value = serde_json::from_str(content)?;
        cache
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.pointer("/token/refresh_token")?.as_str())
            .find(|token| !token.is_empty())
            .map(|token| Self {
                refresh_token: token.to_string(),
            })
            .ok_or_else(|| {
                GmailError::AuthError("Token cache holds no refresh token".to_string())
            })
    }
}

/// Produces authorized transports; built once at startup and passed down
pub struct CredentialProvider {
    hub: Arc<GmailHub>,
    limiter: QuotaRateLimiter,
}

impl CredentialProvider {
    /// Reuse the stored refresh token when there is one, otherwise authorize interactively
    pub async fn from_config(auth: &AuthConfig, quota: &QuotaConfig) -> Result<Self> {
        let secret = load_application_secret(&auth.credentials_path).await?;

        let hub = match RefreshTokenRecord::load(&auth.refresh_token_path).await? {
            Some(record) => {
                debug!("Using stored refresh token from {:?}", auth.refresh_token_path);
                refresh_token_hub(secret, record).await?
            }
            None => {
                let hub = installed_flow_hub(secret, &auth.token_cache_path).await?;
                persist_refresh_token(auth).await?;
                hub
            }
        };

        Ok(Self {
            hub: Arc::new(hub),
            limiter: QuotaRateLimiter::from_config(quota),
        })
    }

    /// Run the browser flow now, discarding any stored tokens when `force` is set
    pub async fn authorize(auth: &AuthConfig, quota: &QuotaConfig, force: bool) -> Result<Self> {
        if force {
            for path in [&auth.refresh_token_path, &auth.token_cache_path] {
                if path.exists() {
                    tokio::fs::remove_file(path).await?;
                    info!("Removed stored credentials at {:?}", path);
                }
            }
        }
        Self::from_config(auth, quota).await
    }

    pub fn hub(&self) -> Arc<GmailHub> {
        Arc::clone(&self.hub)
    }

    /// Transport sharing this provider's hub and quota bucket
    pub fn authorized_transport(&self) -> GmailTransport {
        GmailTransport::new(Arc::clone(&self.hub), self.limiter.clone())
    }
}

/// Read the OAuth2 client from the credentials file, falling back to the environment
async fn load_application_secret(path: &Path) -> Result<ApplicationSecret> {
    if path.exists() {
        return yup_oauth2::read_application_secret(path)
            .await
            .map_err(|e| GmailError::AuthError(format!("Failed to read credentials: {}", e)));
    }
    debug!("No credentials file at {:?}, trying environment", path);
    load_credentials_from_env()
}

async fn installed_flow_hub(secret: ApplicationSecret, token_cache_path: &Path) -> Result<GmailHub> {
    // HTTPRedirect opens a browser for user authorization
    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Token is requested up front so the cache holds the right scopes before any call
    auth.token(REQUIRED_SCOPES)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if token_cache_path.exists() {
        secure_token_file(token_cache_path).await?;
    }

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(https_connector()?);
    Ok(Gmail::new(client, auth))
}

async fn refresh_token_hub(secret: ApplicationSecret, record: RefreshTokenRecord) -> Result<GmailHub> {
    let user_secret = AuthorizedUserSecret {
        client_id: secret.client_id,
        client_secret: secret.client_secret,
        refresh_token: record.refresh_token,
        key_type: "authorized_user".to_string(),
    };

    let auth = yup_oauth2::AuthorizedUserAuthenticator::builder(user_secret)
        .build()
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    auth.token(REQUIRED_SCOPES)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to refresh token: {}", e)))?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(https_connector()?);
    Ok(Gmail::new(client, auth))
}

async fn persist_refresh_token(auth: &AuthConfig) -> Result<()> {
    let content = tokio::fs::read_to_string(&auth.token_cache_path)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to read token cache: {}", e)))?;
    let record = RefreshTokenRecord::from_token_cache(&content)?;
    record.save(&auth.refresh_token_path).await?;
    info!("Stored refresh token at {:?}", auth.refresh_token_path);
    Ok(())
}

fn https_connector(
) -> Result<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>> {
    // HTTP/1 only; google-gmail1 behaves better without HTTP/2
    Ok(hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| GmailError::AuthError(format!("Failed to load TLS roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build())
}

/// Load OAuth2 client credentials from environment variables
///
/// # Environment Variables
/// - `GMAIL_CLIENT_ID`: OAuth2 client ID
/// - `GMAIL_CLIENT_SECRET`: OAuth2 client secret
/// - `GMAIL_REDIRECT_URI`: Redirect URI (optional, defaults to http://localhost:8080)
pub fn load_credentials_from_env() -> Result<ApplicationSecret> {
    let client_id = env::var("GMAIL_CLIENT_ID")
        .map_err(|_| GmailError::ConfigError("GMAIL_CLIENT_ID not set".to_string()))?;
    let client_secret = env::var("GMAIL_CLIENT_SECRET")
        .map_err(|_| GmailError::ConfigError("GMAIL_CLIENT_SECRET not set".to_string()))?;
    let redirect_uri =
        env::var("GMAIL_REDIRECT_URI").unwrap_or_else(|_| "http://localhost:8080".to_string());

    Ok(ApplicationSecret {
        client_id,
        client_secret,
        auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
        token_uri: "https://oauth2.googleapis.com/token".to_string(),
        redirect_uris: vec![redirect_uri],
        ..Default::default()
    })
}

/// Restrict a credential file to its owner (0600)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows relies on the profile directory ACLs
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
