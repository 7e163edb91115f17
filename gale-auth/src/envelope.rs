// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signing, verification, encryption and decryption of message bodies.
//!
//! The envelope header grammar is one line of space-separated fields,
//! base64-framed where binary:
//!
//! ```text
//! Signature-Header  ::= "RSA/MD5" SP identity SP base64-signature
//! Encryption-Header ::= "RSA/3DES" SP identity SP base64-iv SP base64-wrapped-key
//! ```
//!
//! Signatures are MD5 digests under PKCS#1 v1.5; payloads are encrypted
//! with a fresh 3DES-EDE session key in CBC mode, wrapped for the
//! recipient under RSA PKCS#1 v1.5. The algorithm pairing is fixed by the
//! deployed protocol; unrecognized tags are rejected, never guessed.
//!
//! All four operations are total over untrusted input. Every failure path
//! is a typed [`EnvelopeError`]; the caller decides whether to drop the
//! message, display it distrustfully, or give up.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::Md5;
use rand::RngCore;
use rsa::Pkcs1v15Encrypt;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use thiserror::Error;

use crate::identity::Identity;
use crate::keystore::{KeyStore, KeyStoreError};

/// Algorithm tag of the deployed digest + signature pairing.
pub const SIGNATURE_ALG: &str = "RSA/MD5";

/// Algorithm tag of the deployed cipher pairing.
pub const ENCRYPTION_ALG: &str = "RSA/3DES";

const SESSION_KEY_LEN: usize = 24;
const IV_LEN: usize = 8;

type Des3CbcEnc = cbc::Encryptor<des::TdesEde3>;
type Des3CbcDec = cbc::Decryptor<des::TdesEde3>;

/// Sign `message` as `signer`, producing a signature header.
///
/// The signer's key pair is obtained from the store, generating it on
/// first use. Deterministic: the same key material and message always
/// produce the same header.
pub fn sign(keys: &KeyStore, signer: &Identity, message: &[u8]) -> Result<String, EnvelopeError> {
    let pair = keys.load_or_generate(signer)?;
    let signing_key = SigningKey::<Md5>::new(pair.private_key().clone());
    let signature = signing_key
        .try_sign(message)
        .map_err(EnvelopeError::Signing)?;
    Ok(format!(
        "{SIGNATURE_ALG} {signer} {}",
        BASE64.encode(signature.to_vec())
    ))
}

/// Verify a signature header against `message`, returning the signer.
pub fn verify(keys: &KeyStore, header: &str, message: &[u8]) -> Result<Identity, EnvelopeError> {
    // The tag must be followed by the separator; `RSA/MD5x` is not a match.
    let Some(rest) = header
        .strip_prefix(SIGNATURE_ALG)
        .and_then(|rest| rest.strip_prefix(' '))
    else {
        return Err(EnvelopeError::UnsupportedAlgorithm(first_field(header)));
    };
    let (signer, signature_b64) = rest
        .split_once(' ')
        .ok_or(EnvelopeError::MalformedHeader("missing signature payload"))?;
    let signer = Identity::new(signer)
        .map_err(|_| EnvelopeError::MalformedHeader("signer identity has no domain"))?;

    let public = keys.lookup_public_key(&signer).map_err(|err| match err {
        KeyStoreError::KeyNotFound(_) => EnvelopeError::UnknownSigner(signer.clone()),
        other => EnvelopeError::Key(other),
    })?;

    let raw = BASE64
        .decode(signature_b64)
        .map_err(|_| EnvelopeError::MalformedSignature)?;
    let signature =
        Signature::try_from(raw.as_slice()).map_err(|_| EnvelopeError::MalformedSignature)?;

    VerifyingKey::<Md5>::new(public)
        .verify(message, &signature)
        .map_err(|_| EnvelopeError::SignatureMismatch(signer.clone()))?;
    Ok(signer)
}

/// Encrypt `message` for `recipient`, returning the encryption header and
/// the ciphertext.
///
/// Fails with [`EnvelopeError::RecipientKeyNotFound`] before any state
/// changes when the recipient's public key cannot be discovered.
pub fn encrypt(
    keys: &KeyStore,
    recipient: &Identity,
    message: &[u8],
) -> Result<(String, Vec<u8>), EnvelopeError> {
    let public = keys.lookup_public_key(recipient).map_err(|err| match err {
        KeyStoreError::KeyNotFound(_) => EnvelopeError::RecipientKeyNotFound(recipient.clone()),
        other => EnvelopeError::Key(other),
    })?;

    let mut rng = keys.session_rng();
    let mut session_key = [0u8; SESSION_KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut session_key);
    rng.fill_bytes(&mut iv);

    let cipher = Des3CbcEnc::new(&session_key.into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(message);

    let wrapped = public
        .encrypt(&mut rng, Pkcs1v15Encrypt, &session_key)
        .map_err(EnvelopeError::Wrap)?;

    let header = format!(
        "{ENCRYPTION_ALG} {recipient} {} {}",
        BASE64.encode(iv),
        BASE64.encode(&wrapped)
    );
    Ok((header, ciphertext))
}

/// Decrypt `ciphertext` under an encryption header, returning the
/// recipient identity named by the header and the plaintext.
///
/// The header's identity only selects which local private key unwraps the
/// session key; it authenticates nothing.
pub fn decrypt(
    keys: &KeyStore,
    header: &str,
    ciphertext: &[u8],
) -> Result<(Identity, Vec<u8>), EnvelopeError> {
    let Some(rest) = header
        .strip_prefix(ENCRYPTION_ALG)
        .and_then(|rest| rest.strip_prefix(' '))
    else {
        return Err(EnvelopeError::UnsupportedAlgorithm(first_field(header)));
    };

    let mut fields = rest.splitn(3, ' ');
    let recipient = fields
        .next()
        .ok_or(EnvelopeError::MalformedHeader("missing recipient"))?;
    let iv_b64 = fields
        .next()
        .ok_or(EnvelopeError::MalformedHeader("missing initialization vector"))?;
    let wrapped_b64 = fields
        .next()
        .ok_or(EnvelopeError::MalformedHeader("missing wrapped session key"))?;

    let recipient = Identity::new(recipient)
        .map_err(|_| EnvelopeError::MalformedHeader("recipient identity has no domain"))?;
    let iv = BASE64
        .decode(iv_b64)
        .map_err(|_| EnvelopeError::MalformedHeader("invalid initialization vector encoding"))?;
    if iv.len() != IV_LEN {
        return Err(EnvelopeError::MalformedHeader(
            "invalid initialization vector length",
        ));
    }
    let wrapped = BASE64
        .decode(wrapped_b64)
        .map_err(|_| EnvelopeError::MalformedHeader("invalid wrapped session key encoding"))?;

    let pair = keys.load_private_key(&recipient).map_err(|err| match err {
        KeyStoreError::KeyNotFound(_) => EnvelopeError::NoLocalKey(recipient.clone()),
        other => EnvelopeError::Key(other),
    })?;

    let session_key = pair
        .private_key()
        .decrypt(Pkcs1v15Encrypt, &wrapped)
        .map_err(|_| EnvelopeError::KeyUnwrapFailed)?;
    if session_key.len() != SESSION_KEY_LEN {
        return Err(EnvelopeError::KeyUnwrapFailed);
    }

    let cipher = Des3CbcDec::new_from_slices(&session_key, &iv)
        .map_err(|_| EnvelopeError::KeyUnwrapFailed)?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| EnvelopeError::DecryptFailed)?;

    Ok((recipient, plaintext))
}

fn first_field(header: &str) -> String {
    header
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Error types for envelope operations.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The header names an algorithm pairing this implementation does not
    /// speak.
    #[error("unsupported envelope algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// The header does not match the grammar.
    #[error("malformed envelope header: {0}")]
    MalformedHeader(&'static str),

    /// No public key could be discovered for the claimed signer.
    #[error("no key found for signer '{0}'")]
    UnknownSigner(Identity),

    /// The signature payload is not decodable.
    #[error("malformed signature encoding")]
    MalformedSignature,

    /// The signature does not match the message under the signer's key.
    #[error("signature from '{0}' does not match the message")]
    SignatureMismatch(Identity),

    /// No public key could be discovered for the recipient.
    #[error("no key found for recipient '{0}'")]
    RecipientKeyNotFound(Identity),

    /// This process holds no private key for the identity the header
    /// addresses.
    #[error("no local private key for '{0}'")]
    NoLocalKey(Identity),

    /// The wrapped session key does not unwrap under the local key.
    #[error("session key unwrap failed")]
    KeyUnwrapFailed,

    /// The payload does not decrypt under the unwrapped session key.
    #[error("payload decryption failed")]
    DecryptFailed,

    /// The signing operation itself failed.
    #[error("signing failed: {0}")]
    Signing(rsa::signature::Error),

    /// Session key wrapping failed.
    #[error("session key wrapping failed: {0}")]
    Wrap(rsa::Error),

    /// The key store failed for a reason other than a missing key.
    #[error(transparent)]
    Key(#[from] KeyStoreError),
}
