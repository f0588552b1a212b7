//! Bearer tokens and where they come from.
//!
//! The OAuth authorization-code exchange happens outside of this crate. An
//! [`Authority`] is the contract with whatever performed it: it hands over
//! the current access token and can invalidate the server-side session.
//! The [`TokenProvider`] keeps the token in session storage so that lookups
//! never touch the network.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use http::Method;
use serde::Deserialize;
use url::Url;
use veil::Redact;

use crate::{
    error::{Error, Result},
    http::{Request, Transport},
    storage::{self, SessionStorage},
};

/// Opaque bearer credential.
///
/// Redacted in debug output.
#[derive(Redact, Clone, PartialEq, Eq, Hash)]
pub struct AccessToken {
    #[redact]
    token: String,
}

impl AccessToken {
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the token is empty or contains
    /// whitespace, which would corrupt the `Authorization` header.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(Error::invalid_argument(
                "access token must be non-empty and without whitespace",
            ));
        }

        Ok(Self { token })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Reads the token from the contents of a secrets file.
    ///
    /// Returns `Ok(None)` when the file has no `access_token` key.
    ///
    /// # Errors
    ///
    /// Returns an error if the contents are not valid TOML or the token is
    /// malformed.
    pub fn from_toml(contents: &str) -> Result<Option<Self>> {
        #[derive(Deserialize)]
        struct Secrets {
            access_token: Option<String>,
        }

        let secrets: Secrets = toml::from_str(contents)?;
        secrets.access_token.map(Self::new).transpose()
    }
}

/// The OAuth collaborator.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Returns the bearer token the collaborator currently holds, if any.
    async fn fetch_token(&self) -> Result<Option<AccessToken>>;

    /// Invalidates the server-side session.
    async fn logout(&self) -> Result<()>;
}

/// Authority backed by the OAuth callback endpoint.
///
/// The callback writes the token it obtained into a TOML secrets file and
/// offers a logout action over HTTP.
pub struct CallbackAuthority {
    secrets_file: PathBuf,
    logout_url: Option<Url>,
    transport: Arc<dyn Transport>,
}

impl CallbackAuthority {
    /// Secrets files are tiny. Anything bigger is not what we expect.
    const MAX_SECRETS_SIZE: u64 = 8 * 1024;

    pub fn new(
        secrets_file: impl AsRef<Path>,
        logout_url: Option<Url>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            secrets_file: secrets_file.as_ref().to_path_buf(),
            logout_url,
            transport,
        }
    }
}

#[async_trait]
impl Authority for CallbackAuthority {
    async fn fetch_token(&self) -> Result<Option<AccessToken>> {
        let path = &self.secrets_file;
        let attributes = match fs::metadata(path) {
            Ok(attributes) => attributes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} does not exist", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        // Prevent out-of-memory condition: secrets file should be small.
        if attributes.len() > Self::MAX_SECRETS_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        AccessToken::from_toml(&contents)
    }

    async fn logout(&self) -> Result<()> {
        let Some(url) = &self.logout_url else {
            debug!("no logout url configured");
            return Ok(());
        };

        let request = Request::new(Method::GET, url.clone());
        let response = self.transport.send(request).await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(Error::request_failed(url.path(), response.status))
        }
    }
}

/// Session-scoped token lookup with explicit invalidation.
#[derive(Clone)]
pub struct TokenProvider {
    storage: SessionStorage,
    authority: Arc<dyn Authority>,
}

impl TokenProvider {
    pub fn new(storage: SessionStorage, authority: Arc<dyn Authority>) -> Self {
        Self { storage, authority }
    }

    /// Synchronous lookup from session storage.
    #[must_use]
    pub fn token(&self) -> Option<AccessToken> {
        self.storage
            .get(storage::ACCESS_TOKEN)
            .and_then(|token| AccessToken::new(token).ok())
    }

    pub fn store(&self, token: &AccessToken) {
        self.storage.set(storage::ACCESS_TOKEN, token.as_str());
    }

    pub fn invalidate(&self) {
        if self.storage.remove(storage::ACCESS_TOKEN).is_some() {
            debug!("access token invalidated");
        }
    }

    /// Drops the current token and asks the authority for a fresh one, once.
    pub async fn reload(&self) -> Option<AccessToken> {
        self.invalidate();

        match self.authority.fetch_token().await {
            Ok(Some(token)) => {
                self.store(&token);
                debug!("access token reloaded");
                Some(token)
            }
            Ok(None) => {
                error!("no access token found");
                None
            }
            Err(e) => {
                error!("failed to reload access token: {e}");
                None
            }
        }
    }

    /// Invalidates the server-side session.
    ///
    /// # Errors
    ///
    /// Returns the authority's error when the logout round trip fails.
    pub async fn logout(&self) -> Result<()> {
        self.authority.logout().await
    }
}
