// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Gale pub/sub messaging platform.
//!
//! Gale exchanges structured, optionally signed and/or encrypted messages
//! between a server and many clients. This crate bundles the two halves
//! of the platform's core:
//!
//! - [`gale_core`] — the [`Group`]/[`Fragment`] content model and its
//!   binary wire codec. Message content is schemaless nested structure;
//!   decoding is lossless on well-formed input and degrades gracefully on
//!   anything else.
//! - [`gale_auth`] — canonical [`Identity`] strings, the on-disk RSA
//!   [`KeyStore`], and the envelope protocol that signs, verifies,
//!   encrypts and decrypts message bodies.
//!
//! Transports, subscription routing and display clients sit on top of
//! these APIs; they hand the codec raw bytes and the envelope raw header
//! strings, and consume the typed results.
//!
//! ```
//! use gale::{Fragment, Group, decode_group, encode_group};
//!
//! let content = Group::new()
//!     .add(Fragment::text("message", "hello, world"))
//!     .add(Fragment::text("from", "alice@example.org"));
//!
//! let wire = encode_group(&content);
//! assert_eq!(decode_group(&wire), content);
//! ```

pub use gale_auth::{
    Config, ConfigError, EnvelopeError, HeaderLine, Identity, IdentityError, KeyPair, KeyStore,
    KeyStoreError, OpenedMessage, decrypt, encrypt, open, parse_header, sealed, sign, signed,
    verify,
};
pub use gale_core::{
    Fragment, FragmentType, FragmentValue, Group, Timestamp, decode_group, encode_group,
    encoded_len,
};
