// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message header lines and the envelope stacking walk.
//!
//! A message body starts with zero or more `Key: value` lines terminated
//! by an empty line; the content follows. Two keys carry the envelope: a
//! leading `Encryption` header decrypts the remainder of the body (and the
//! walk continues inside the plaintext), and a leading `Signature` header
//! is verified against the bytes that followed it *as read* — before any
//! later decryption step. When a signature header arrives wrapped around
//! ciphertext, the signature therefore covers the ciphertext, not the
//! plaintext; that ordering is part of the deployed protocol and is
//! preserved here.
//!
//! Once any header other than a leading `Encryption` line has been seen,
//! later `Encryption` and `Signature` lines are ordinary headers with no
//! envelope meaning.

use tracing::warn;

use crate::envelope::{EnvelopeError, decrypt, encrypt, sign, verify};
use crate::identity::Identity;
use crate::keystore::KeyStore;

/// Header key carrying a signature envelope header.
pub const SIGNATURE_KEY: &str = "Signature";

/// Header key carrying an encryption envelope header.
pub const ENCRYPTION_KEY: &str = "Encryption";

/// One step of header parsing.
#[derive(Debug, PartialEq)]
pub enum HeaderLine<'a> {
    /// A `Key: value` line and the bytes that follow it.
    Field {
        key: &'a str,
        value: &'a str,
        rest: &'a [u8],
    },
    /// The header block has ended; the message content starts here. An
    /// empty separator line is consumed, anything else is left in place.
    Body(&'a [u8]),
}

/// Parse one header line off the front of `data`.
///
/// A header line is `Key: value` ending in `\r\n` (bare `\n` tolerated),
/// with surrounding whitespace trimmed off both halves. An empty line ends
/// the block and is consumed; a line with no colon, bytes with no newline,
/// and non-UTF-8 lines all end the block unconsumed.
pub fn parse_header(data: &[u8]) -> HeaderLine<'_> {
    let Some(newline) = data.iter().position(|&byte| byte == b'\n') else {
        return HeaderLine::Body(data);
    };

    let mut line = &data[..newline];
    if let Some((&b'\r', head)) = line.split_last() {
        line = head;
    }
    let rest = &data[newline + 1..];

    if line.is_empty() {
        return HeaderLine::Body(rest);
    }
    let Ok(line) = std::str::from_utf8(line) else {
        return HeaderLine::Body(data);
    };
    let Some((key, value)) = line.split_once(':') else {
        return HeaderLine::Body(data);
    };

    HeaderLine::Field {
        key: key.trim(),
        value: value.trim(),
        rest,
    }
}

/// A message body with its envelope removed.
#[derive(Debug)]
pub struct OpenedMessage {
    /// Verified signer, when a leading signature header checked out.
    pub signer: Option<Identity>,
    /// Why the leading signature header did not check out, when it did not.
    /// The message is still delivered; trust policy belongs to the caller.
    pub signature_error: Option<EnvelopeError>,
    /// The identity whose key decrypted the body, when it was encrypted.
    pub recipient: Option<Identity>,
    /// The remaining ordinary headers, in order.
    pub fields: Vec<(String, String)>,
    /// The content after the header block.
    pub body: Vec<u8>,
}

/// Walk a message body's header block, unwrapping the envelope.
///
/// Decryption failures abort with their typed error: there is no message
/// to deliver. Signature failures do not abort; they are reported in
/// [`OpenedMessage::signature_error`] and warned about, and the message is
/// delivered for the caller to judge.
pub fn open(keys: &KeyStore, message: &[u8]) -> Result<OpenedMessage, EnvelopeError> {
    let mut owned = message.to_vec();
    let mut offset = 0;
    let mut first = true;

    let mut signer = None;
    let mut signature_error = None;
    let mut recipient = None;
    let mut fields = Vec::new();

    loop {
        let decrypted = match parse_header(&owned[offset..]) {
            HeaderLine::Body(body) => {
                return Ok(OpenedMessage {
                    signer,
                    signature_error,
                    recipient,
                    fields,
                    body: body.to_vec(),
                });
            }
            HeaderLine::Field { key, value, rest }
                if first && key.eq_ignore_ascii_case(ENCRYPTION_KEY) =>
            {
                Some(decrypt(keys, value, rest)?)
            }
            HeaderLine::Field { key, value, rest } => {
                if first && key.eq_ignore_ascii_case(SIGNATURE_KEY) {
                    // Coverage is the bytes following the header as they
                    // stand right now, decrypted later or not.
                    match verify(keys, value, rest) {
                        Ok(id) => signer = Some(id),
                        Err(err) => {
                            warn!("cannot validate signature: {err}");
                            signature_error = Some(err);
                        }
                    }
                } else {
                    fields.push((key.to_string(), value.to_string()));
                }
                first = false;
                offset = owned.len() - rest.len();
                None
            }
        };

        if let Some((id, plaintext)) = decrypted {
            recipient = Some(id);
            owned = plaintext;
            offset = 0;
            // `first` stays set: the plaintext may itself begin with
            // further envelope headers.
        }
    }
}

/// Prepend a signature header covering `message`.
///
/// `message` should be a complete header block plus content; the new
/// signature line becomes its first header.
pub fn signed(keys: &KeyStore, signer: &Identity, message: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let header = sign(keys, signer, message)?;
    let mut out = format!("{SIGNATURE_KEY}: {header}\r\n").into_bytes();
    out.extend_from_slice(message);
    Ok(out)
}

/// Encrypt `message` for `recipient` and prepend the encryption header.
/// The bytes after the header line are the ciphertext.
pub fn sealed(
    keys: &KeyStore,
    recipient: &Identity,
    message: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let (header, ciphertext) = encrypt(keys, recipient, message)?;
    let mut out = format!("{ENCRYPTION_KEY}: {header}\r\n").into_bytes();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::identity::Identity;
    use crate::keystore::KeyStore;
    use crate::keystore::tests::test_config;

    use super::{HeaderLine, open, parse_header, sealed, signed};

    fn store(dir: &std::path::Path) -> KeyStore {
        KeyStore::new(test_config(dir)).unwrap()
    }

    fn identity(raw: &str) -> Identity {
        Identity::new(raw).unwrap()
    }

    #[test]
    fn parses_crlf_and_lf_lines() {
        for text in [
            "From: alice@example.org\r\nrest",
            "From: alice@example.org\nrest",
        ] {
            let HeaderLine::Field { key, value, rest } = parse_header(text.as_bytes()) else {
                panic!("expected a header field");
            };
            assert_eq!(key, "From");
            assert_eq!(value, "alice@example.org");
            assert_eq!(rest, b"rest");
        }
    }

    #[test]
    fn blank_line_ends_the_block_consumed() {
        assert_eq!(
            parse_header(b"\r\ncontent"),
            HeaderLine::Body(b"content" as &[u8])
        );
        assert_eq!(
            parse_header(b"\ncontent"),
            HeaderLine::Body(b"content" as &[u8])
        );
    }

    #[test]
    fn non_header_content_ends_the_block_unconsumed() {
        // No colon before the newline.
        assert_eq!(
            parse_header(b"just text\nmore"),
            HeaderLine::Body(b"just text\nmore" as &[u8])
        );
        // No newline at all.
        assert_eq!(
            parse_header(b"Key: value"),
            HeaderLine::Body(b"Key: value" as &[u8])
        );
        // Binary garbage.
        assert_eq!(
            parse_header(b"\xff\xfe\n"),
            HeaderLine::Body(b"\xff\xfe\n" as &[u8])
        );
    }

    #[test]
    fn open_collects_plain_headers() {
        let dir = tempfile::tempdir().unwrap();
        let keys = store(dir.path());

        let message = b"From: alice@example.org\r\nSequence: 4\r\n\r\nhello";
        let opened = open(&keys, message).unwrap();
        assert_eq!(opened.signer, None);
        assert_eq!(opened.recipient, None);
        assert_eq!(
            opened.fields,
            vec![
                ("From".to_string(), "alice@example.org".to_string()),
                ("Sequence".to_string(), "4".to_string()),
            ]
        );
        assert_eq!(opened.body, b"hello");
    }

    #[test]
    fn open_verifies_a_leading_signature() {
        let dir = tempfile::tempdir().unwrap();
        let keys = store(dir.path());
        let alice = identity("alice@example.org");

        let inner = b"From: alice@example.org\r\n\r\nhello";
        let message = signed(&keys, &alice, inner).unwrap();

        let opened = open(&keys, &message).unwrap();
        assert_eq!(opened.signer, Some(alice));
        assert!(opened.signature_error.is_none());
        assert_eq!(opened.body, b"hello");
    }

    #[test]
    fn open_reports_a_broken_signature_without_dropping_the_message() {
        let dir = tempfile::tempdir().unwrap();
        let keys = store(dir.path());
        let alice = identity("alice@example.org");

        let mut message = signed(&keys, &alice, b"Subject: x\r\n\r\nhello").unwrap();
        let last = message.len() - 1;
        message[last] ^= 0x01;

        let opened = open(&keys, &message).unwrap();
        assert_eq!(opened.signer, None);
        assert!(opened.signature_error.is_some());
        assert_eq!(opened.body, b"helln");
    }

    #[test]
    fn open_decrypts_then_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let keys = store(dir.path());
        let alice = identity("alice@example.org");
        keys.load_or_generate(&alice).unwrap();

        // Sign first, then encrypt: the usual composition. The signature
        // ends up covering plaintext.
        let inner = signed(&keys, &alice, b"Agent: gsub\r\n\r\nhello").unwrap();
        let message = sealed(&keys, &alice, &inner).unwrap();

        let opened = open(&keys, &message).unwrap();
        assert_eq!(opened.recipient, Some(alice.clone()));
        assert_eq!(opened.signer, Some(alice));
        assert_eq!(
            opened.fields,
            vec![("Agent".to_string(), "gsub".to_string())]
        );
        assert_eq!(opened.body, b"hello");
    }

    #[test]
    fn signature_over_ciphertext_is_preserved_not_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let keys = store(dir.path());
        let alice = identity("alice@example.org");
        keys.load_or_generate(&alice).unwrap();

        // Encrypt first, then sign: the signature covers the encryption
        // header and the ciphertext.
        let encrypted = sealed(&keys, &alice, b"Subject: x\r\n\r\nsecret").unwrap();
        let message = signed(&keys, &alice, &encrypted).unwrap();

        let opened = open(&keys, &message).unwrap();
        // The signature verifies over the ciphertext bytes.
        assert_eq!(opened.signer, Some(alice));
        // But the encryption header behind it is an ordinary field now:
        // nothing is decrypted once the leading position is spent.
        assert_eq!(opened.recipient, None);
        assert_eq!(opened.fields[0].0, "Encryption");
    }

    #[test]
    fn decryption_failure_aborts_open() {
        let dir = tempfile::tempdir().unwrap();
        let keys = store(dir.path());
        let alice = identity("alice@example.org");
        keys.load_or_generate(&alice).unwrap();

        let message = sealed(&keys, &alice, b"\r\nsecret").unwrap();

        let other_dir = tempfile::tempdir().unwrap();
        let other = store(other_dir.path());
        assert!(open(&other, &message).is_err());
    }

    #[test]
    fn headerless_message_is_all_body() {
        let dir = tempfile::tempdir().unwrap();
        let keys = store(dir.path());
        let opened = open(&keys, b"no headers here").unwrap();
        assert!(opened.fields.is_empty());
        assert_eq!(opened.body, b"no headers here");
    }
}
