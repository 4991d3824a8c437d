//! OAuth2 authentication management for Gmail API

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::Path;

use crate::error::{CleanerError, Result};

/// Read/write access without permanent deletion; enough to read headers,
/// list and create labels, and batch-modify messages
pub const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

pub const REQUIRED_SCOPES: &[&str] = &[MODIFY_SCOPE];

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Initialize Gmail API hub with OAuth2 authentication
///
/// Runs the installed-app flow when no valid token is cached, persists the
/// token to `token_cache_path` and restricts its permissions.
///
/// # Arguments
/// * `credentials_path` - Path to the OAuth2 credentials JSON file
/// * `token_cache_path` - Path where access tokens will be cached
pub async fn initialize_gmail_hub(
    credentials_path: &Path,
    token_cache_path: &Path,
) -> Result<GmailHub> {
    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| CleanerError::AuthError(format!("Failed to read credentials: {}", e)))?;

    if let Some(parent) = token_cache_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    // HTTPRedirect opens a browser for user authorization
    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| CleanerError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Pre-authenticate so the token is cached with the scope every call uses
    let _token = auth
        .token(REQUIRED_SCOPES)
        .await
        .map_err(|e| CleanerError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if token_cache_path.exists() {
        secure_token_file(token_cache_path).await?;
    }

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| CleanerError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

/// Restrict the token file to its owner (0600)
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
