// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity, key material and the message envelope protocol for Gale.
//!
//! Gale names users and services with canonical `local@domain`
//! [`Identity`] strings. Each identity owns an RSA key pair, generated
//! lazily and persisted by the [`KeyStore`]; other identities' public keys
//! are discovered through the store's lookup chain. On top of the store,
//! the [`envelope`] module signs, verifies, encrypts and decrypts message
//! bodies using the deployed `RSA/MD5` and `RSA/3DES` header grammar, and
//! the [`headers`] module walks the stacked envelope headers at the top of
//! a message body.
//!
//! Every operation is synchronous and total over untrusted input: protocol
//! failures surface as typed errors, never panics. This crate never
//! installs a tracing subscriber; diagnostics go to whatever the host
//! program configured.

pub mod config;
pub mod envelope;
pub mod headers;
pub mod identity;
pub mod keystore;

mod entropy;

pub use config::{Config, ConfigError};
pub use envelope::{ENCRYPTION_ALG, EnvelopeError, SIGNATURE_ALG, decrypt, encrypt, sign, verify};
pub use headers::{HeaderLine, OpenedMessage, open, parse_header, sealed, signed};
pub use identity::{Identity, IdentityError};
pub use keystore::{DEFAULT_RSA_BITS, KeyPair, KeyStore, KeyStoreError};
