// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical user and service identities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A canonical identity string of the form `local-part@domain`.
///
/// Bare local parts are canonicalized against a default domain with
/// [`Identity::canonical`]. The domain is everything after the *last* `@`,
/// so a (nonstandard) local part containing `@` still splits correctly.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity(String);

impl Identity {
    /// Accepts an already-canonical identity.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        if raw.contains('@') {
            Ok(Self(raw))
        } else {
            Err(IdentityError::MissingDomain(raw))
        }
    }

    /// Canonicalize a user-facing identity string: anything already
    /// containing `@` passes through unchanged, a bare local part gets
    /// `@domain` appended.
    pub fn canonical(raw: &str, domain: &str) -> Self {
        if raw.contains('@') {
            Self(raw.to_string())
        } else {
            Self(format!("{raw}@{domain}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn local_part(&self) -> &str {
        match self.0.rsplit_once('@') {
            Some((local, _)) => local,
            None => &self.0,
        }
    }

    pub fn domain(&self) -> &str {
        match self.0.rsplit_once('@') {
            Some((_, domain)) => domain,
            None => "",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::new(raw)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Identity::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Error types for [`Identity`].
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The identity string carries no `@domain` part.
    #[error("identity '{0}' has no domain part")]
    MissingDomain(String),
}
