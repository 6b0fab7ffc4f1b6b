//! Remote URL resolution with credentials

use secrecy::ExposeSecret;
use url::Url;

use crate::authn::cipher::CredentialCipher;
use crate::errors::BackendError;
use crate::models::repository::RepositoryConnection;

/// A clone URL carrying the decrypted credentials of a repository connection
pub struct Remote {
    url: String,
    secrets: Vec<String>,
}

impl Remote {
    pub fn resolve(
        repo: &RepositoryConnection,
        cipher: &CredentialCipher,
    ) -> Result<Self, BackendError> {
        let token = cipher.decrypt(&repo.token)?;
        let token = token.expose_secret();
        let (url, encoded) = authenticated_url(&repo.repo_url, &repo.username, token)?;

        let mut secrets = Vec::new();
        if !token.is_empty() {
            secrets.push(token.to_string());
        }
        if let Some(encoded) = encoded {
            if encoded != token {
                secrets.push(encoded);
            }
        }
        Ok(Self { url, secrets })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Strings to mask in any git output
    pub fn redactions(&self) -> Vec<&str> {
        self.secrets.iter().map(String::as_str).collect()
    }
}

/// Inject `username:token` into an HTTP(S) URL
///
/// Other schemes, scp-like addresses and local paths are returned untouched.
/// The second value is the token as it appears in the URL after encoding.
pub fn authenticated_url(
    raw: &str,
    username: &str,
    token: &str,
) -> Result<(String, Option<String>), BackendError> {
    if token.is_empty() {
        return Ok((raw.to_string(), None));
    }
    let Ok(mut url) = Url::parse(raw) else {
        return Ok((raw.to_string(), None));
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return Ok((raw.to_string(), None));
    }

    let user = if username.trim().is_empty() {
        "oauth2"
    } else {
        username.trim()
    };
    url.set_username(user)
        .map_err(|_| BackendError::InvalidParameter(format!("cannot set user on {}", raw)))?;
    url.set_password(Some(token))
        .map_err(|_| BackendError::InvalidParameter(format!("cannot set token on {}", raw)))?;

    let encoded = url.password().map(str::to_string);
    Ok((url.to_string(), encoded))
}
