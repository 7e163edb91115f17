// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration surface for identity resolution and key storage.
//!
//! Everything here is a snapshot: [`Config::from_env`] reads the
//! environment once and the resulting value never changes, so resolution
//! results are stable for the life of the process without any global
//! caching.

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::identity::Identity;

/// Default RSA modulus size for newly generated key pairs.
pub const DEFAULT_RSA_BITS: usize = 1024;

/// Resolved configuration for a [`KeyStore`](crate::KeyStore).
///
/// Environment variables consumed by [`Config::from_env`]:
///
/// - `GALE_DOMAIN` — the default domain for bare identities
/// - `GALE_ID` — explicit local identity override
/// - `GALE_DIR` — state directory (default `$HOME/.gale`)
/// - `GALE_KEY_DIR` — external directory of other identities' public keys
/// - `USER` / `LOGNAME` — the local account name, in that order
#[derive(Clone, Debug, Default)]
pub struct Config {
    domain: Option<String>,
    identity: Option<String>,
    user: Option<String>,
    state_dir: Option<PathBuf>,
    key_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    homes_root: Option<PathBuf>,
    rsa_bits: Option<usize>,
}

impl Config {
    /// An empty configuration; fill it in with the `with_*` methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the process environment.
    pub fn from_env() -> Self {
        let home_dir = env::var_os("HOME").map(PathBuf::from);
        Self {
            domain: non_empty(env::var("GALE_DOMAIN").ok()),
            identity: non_empty(env::var("GALE_ID").ok()),
            user: non_empty(env::var("USER").ok()).or_else(|| non_empty(env::var("LOGNAME").ok())),
            state_dir: env::var_os("GALE_DIR")
                .map(PathBuf::from)
                .or_else(|| home_dir.as_ref().map(|home| home.join(".gale"))),
            key_dir: env::var_os("GALE_KEY_DIR").map(PathBuf::from),
            home_dir,
            homes_root: None,
            rsa_bits: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn with_key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_dir = Some(dir.into());
        self
    }

    pub fn with_home_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(dir.into());
        self
    }

    /// Root of per-account home directories, used to locate other local
    /// users' published public keys. Defaults to `/home`.
    pub fn with_homes_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.homes_root = Some(dir.into());
        self
    }

    /// Modulus size for newly generated keys. Defaults to
    /// [`DEFAULT_RSA_BITS`].
    pub fn with_rsa_bits(mut self, bits: usize) -> Self {
        self.rsa_bits = Some(bits);
        self
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn key_dir(&self) -> Option<&Path> {
        self.key_dir.as_deref()
    }

    pub fn home_dir(&self) -> Option<&Path> {
        self.home_dir.as_deref()
    }

    pub fn homes_root(&self) -> &Path {
        self.homes_root
            .as_deref()
            .unwrap_or(Path::new("/home"))
    }

    pub fn rsa_bits(&self) -> usize {
        self.rsa_bits.unwrap_or(DEFAULT_RSA_BITS)
    }

    pub fn state_dir(&self) -> Result<&Path, ConfigError> {
        self.state_dir.as_deref().ok_or(ConfigError::MissingStateDir)
    }

    fn require_domain(&self) -> Result<&str, ConfigError> {
        self.domain().ok_or(ConfigError::MissingDomain)
    }

    /// Canonicalize a user-facing identity string against the configured
    /// domain. Strings already carrying a domain need no configuration.
    pub fn canonicalize(&self, raw: &str) -> Result<Identity, ConfigError> {
        if raw.contains('@') {
            Ok(Identity::canonical(raw, ""))
        } else {
            Ok(Identity::canonical(raw, self.require_domain()?))
        }
    }

    /// The identity of this process: the explicit override when set,
    /// otherwise the local account name under the configured domain.
    pub fn local_identity(&self) -> Result<Identity, ConfigError> {
        if let Some(identity) = &self.identity {
            return self.canonicalize(identity);
        }
        let user = self.user.as_deref().ok_or(ConfigError::MissingUser)?;
        Ok(Identity::canonical(user, self.require_domain()?))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// A required piece of configuration is absent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no domain configured and $GALE_DOMAIN is not set")]
    MissingDomain,

    #[error("no account name configured and neither $USER nor $LOGNAME is set")]
    MissingUser,

    #[error("no state directory configured and neither $GALE_DIR nor $HOME is set")]
    MissingStateDir,
}
