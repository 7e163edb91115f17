// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk RSA key material, one pair per identity.
//!
//! Keys live under the state directory: private halves in `private-keys/`
//! (owner-only), public halves in `public-keys/` (world-readable). A key
//! file holds the modulus bit length as a big-endian `u32` followed by the
//! key parameters in PKCS#1 DER. The store also publishes the local
//! account's public key as `~/.gale-public-key`, which is where the lookup
//! chain finds other local users' keys.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand_chacha::ChaCha20Rng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey,
};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, ConfigError};
use crate::entropy::Entropy;
use crate::identity::Identity;

pub use crate::config::DEFAULT_RSA_BITS;

const PRIVATE_DIR: &str = "private-keys";
const PUBLIC_DIR: &str = "public-keys";

/// Filename of a published personal public key, relative to a home
/// directory.
pub const PUBLISHED_KEY_FILE: &str = ".gale-public-key";

/// An identity's RSA key pair.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    fn new(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self { private, public }
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public.size() * 8
    }
}

/// Loads, generates, persists and looks up key pairs.
///
/// The store owns all mutable state the envelope protocol needs: a
/// per-process cache of loaded pairs behind a mutex, and the entropy
/// source. Share one store per process; cloning the handle is cheap via
/// the usual `Arc<KeyStore>`.
///
/// The on-disk stores are shared across processes with no locking. Two
/// processes generating keys for the same identity at the same time is a
/// race: both generate, the slower writer wins. A process that starts
/// after another finished simply loads the persisted pair.
pub struct KeyStore {
    config: Config,
    entropy: Entropy,
    cache: Mutex<HashMap<Identity, Arc<KeyPair>>>,
}

impl KeyStore {
    /// Requires a state directory in `config`.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let entropy = Entropy::new(config.state_dir()?);
        Ok(Self {
            config,
            entropy,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The identity this process signs as by default.
    pub fn local_identity(&self) -> Result<Identity, ConfigError> {
        self.config.local_identity()
    }

    pub(crate) fn session_rng(&self) -> ChaCha20Rng {
        self.entropy.rng()
    }

    fn cached(&self, identity: &Identity) -> Option<Arc<KeyPair>> {
        match self.cache.lock() {
            Ok(cache) => cache.get(identity).cloned(),
            Err(_) => None,
        }
    }

    fn remember(&self, identity: &Identity, pair: Arc<KeyPair>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(identity.clone(), pair);
        }
    }

    fn private_key_path(&self, identity: &Identity) -> Result<PathBuf, KeyStoreError> {
        Ok(self
            .store_dir(PRIVATE_DIR)?
            .join(key_file_name(identity)?))
    }

    fn public_key_path(&self, identity: &Identity) -> Result<PathBuf, KeyStoreError> {
        Ok(self.store_dir(PUBLIC_DIR)?.join(key_file_name(identity)?))
    }

    fn store_dir(&self, name: &str) -> Result<PathBuf, KeyStoreError> {
        Ok(self.config.state_dir()?.join(name))
    }

    /// Return the identity's key pair, generating and persisting one on
    /// first use.
    ///
    /// A pair loads when both persisted halves are present and readable;
    /// anything less is treated as absent and regenerated. Generation
    /// failures (no entropy, unwritable storage) are fatal to the
    /// operation: without key material the identity cannot participate.
    pub fn load_or_generate(&self, identity: &Identity) -> Result<Arc<KeyPair>, KeyStoreError> {
        if let Some(pair) = self.cached(identity) {
            return Ok(pair);
        }

        let private_path = self.private_key_path(identity)?;
        let public_path = self.public_key_path(identity)?;
        if let (Some(private), Some(_)) = (
            read_private_record(&private_path),
            read_public_record(&public_path),
        ) {
            let pair = Arc::new(KeyPair::new(private));
            self.remember(identity, pair.clone());
            return Ok(pair);
        }

        warn!("generating RSA keys for {identity}; this takes time, but only once");
        let mut rng = self.session_rng();
        let private = RsaPrivateKey::new(&mut rng, self.config.rsa_bits())?;
        let pair = Arc::new(KeyPair::new(private));
        debug!("done generating keys for {identity}");

        self.persist(identity, &pair, &private_path, &public_path)?;
        self.remember(identity, pair.clone());
        Ok(pair)
    }

    fn persist(
        &self,
        identity: &Identity,
        pair: &KeyPair,
        private_path: &Path,
        public_path: &Path,
    ) -> Result<(), KeyStoreError> {
        let private_der = pair.private_key().to_pkcs1_der()?;
        let public_der = pair.public_key().to_pkcs1_der()?;

        ensure_dir(&self.store_dir(PRIVATE_DIR)?, 0o700)?;
        write_record(private_path, 0o600, pair.bits(), private_der.as_bytes())?;

        ensure_dir(&self.store_dir(PUBLIC_DIR)?, 0o755)?;
        write_record(public_path, 0o644, pair.bits(), public_der.as_bytes())?;

        // Publish the local account's key at the well-known home path.
        if self.is_local_account(identity) {
            if let Some(home) = self.config.home_dir() {
                let _ = fs::create_dir_all(home);
                write_record(
                    &home.join(PUBLISHED_KEY_FILE),
                    0o644,
                    pair.bits(),
                    public_der.as_bytes(),
                )?;
            }
        }

        Ok(())
    }

    fn is_local_account(&self, identity: &Identity) -> bool {
        self.config.user() == Some(identity.local_part())
            && self.config.domain() == Some(identity.domain())
    }

    /// Load the identity's private key if this process owns one. Never
    /// generates.
    pub fn load_private_key(&self, identity: &Identity) -> Result<Arc<KeyPair>, KeyStoreError> {
        if let Some(pair) = self.cached(identity) {
            return Ok(pair);
        }

        let path = self.private_key_path(identity)?;
        match read_private_record(&path) {
            Some(private) => {
                let pair = Arc::new(KeyPair::new(private));
                self.remember(identity, pair.clone());
                Ok(pair)
            }
            None => Err(KeyStoreError::KeyNotFound(identity.clone())),
        }
    }

    /// Find an identity's public key.
    ///
    /// Search order: the local public-key store; then, for identities in
    /// the local domain, the account's published `~/.gale-public-key`;
    /// then the configured external key directory. The first readable,
    /// well-formed record wins.
    pub fn lookup_public_key(&self, identity: &Identity) -> Result<RsaPublicKey, KeyStoreError> {
        if let Some(pair) = self.cached(identity) {
            return Ok(pair.public_key().clone());
        }

        if let Some(public) = read_public_record(&self.public_key_path(identity)?) {
            return Ok(public);
        }

        if self.config.domain() == Some(identity.domain()) {
            let home = if self.config.user() == Some(identity.local_part()) {
                self.config.home_dir().map(Path::to_path_buf)
            } else {
                Some(self.config.homes_root().join(identity.local_part()))
            };
            if let Some(home) = home {
                if let Some(public) = read_public_record(&home.join(PUBLISHED_KEY_FILE)) {
                    return Ok(public);
                }
            }
        }

        if let Some(key_dir) = self.config.key_dir() {
            if let Ok(name) = key_file_name(identity) {
                if let Some(public) = read_public_record(&key_dir.join(name)) {
                    return Ok(public);
                }
            }
        }

        Err(KeyStoreError::KeyNotFound(identity.clone()))
    }
}

/// Identities become file names; keep them from escaping the store.
fn key_file_name(identity: &Identity) -> Result<&str, KeyStoreError> {
    let name = identity.as_str();
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(KeyStoreError::UnsafeIdentity(identity.clone()));
    }
    Ok(name)
}

fn ensure_dir(path: &Path, mode: u32) -> Result<(), KeyStoreError> {
    fs::create_dir_all(path).map_err(|source| KeyStoreError::io(path, source))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|source| KeyStoreError::io(path, source))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

fn write_record(path: &Path, mode: u32, bits: usize, der: &[u8]) -> Result<(), KeyStoreError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options
        .open(path)
        .map_err(|source| KeyStoreError::io(path, source))?;
    file.write_all(&(bits as u32).to_be_bytes())
        .and_then(|()| file.write_all(der))
        .map_err(|source| KeyStoreError::io(path, source))?;

    // The creation mode is subject to the umask; pin it down.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|source| KeyStoreError::io(path, source))?;
    }
    Ok(())
}

/// Read a key record, checking the bit-length prefix against the key it
/// frames. Unreadable or inconsistent records count as absent.
fn read_record(path: &Path) -> Option<(u32, Vec<u8>)> {
    let bytes = fs::read(path).ok()?;
    let (prefix, der) = bytes.split_first_chunk::<4>()?;
    Some((u32::from_be_bytes(*prefix), der.to_vec()))
}

fn read_private_record(path: &Path) -> Option<RsaPrivateKey> {
    let (bits, der) = read_record(path)?;
    let key = RsaPrivateKey::from_pkcs1_der(&der)
        .inspect_err(|err| warn!("unreadable private key {}: {err}", path.display()))
        .ok()?;
    (key.size() * 8 == bits as usize).then_some(key)
}

fn read_public_record(path: &Path) -> Option<RsaPublicKey> {
    let (bits, der) = read_record(path)?;
    let key = RsaPublicKey::from_pkcs1_der(&der).ok()?;
    (key.size() * 8 == bits as usize).then_some(key)
}

/// Error types for the [`KeyStore`].
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// No readable key material for the identity in any source.
    #[error("no key found for '{0}'")]
    KeyNotFound(Identity),

    /// The identity cannot be used as a key file name.
    #[error("identity '{0}' is not usable as a key file name")]
    UnsafeIdentity(Identity),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Key generation failed.
    #[error("RSA key generation failed: {0}")]
    Generate(#[from] rsa::Error),

    /// Key material could not be serialized.
    #[error("key encoding failed: {0}")]
    Encode(#[from] rsa::pkcs1::Error),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl KeyStoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
