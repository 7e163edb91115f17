// SPDX-License-Identifier: MIT OR Apache-2.0

//! Binary wire codec for groups.
//!
//! Each fragment is a tagged-length-value record, big-endian throughout:
//! a `u32` type code, a `u32` byte length covering the remainder of the
//! record, a length-prefixed name, and a type-specific value. Text (names
//! and text values) is a `u32` code-unit count followed by UTF-16 code
//! units. A group is just its fragments' records back to back; the end of
//! the buffer terminates the sequence.
//!
//! Decoding never fails. Records that cannot be parsed — truncated lengths,
//! bad names, short values, trailing bytes inside a record — degrade into a
//! fragment named `"error"` wrapping the undecoded bytes, with a warning on
//! the diagnostic channel, and decoding continues with the next record.
//! Type codes above the known maximum are tolerated for forward
//! compatibility: the record is skipped whole, provided its name parses.

use tracing::warn;

use crate::fragment::{Fragment, FragmentType, FragmentValue, Timestamp};
use crate::group::Group;

/// Name given to recovery fragments wrapping undecodable record bytes.
pub const ERROR_FRAGMENT_NAME: &str = "error";

const TIME_LEN: usize = 16;
const NUMBER_LEN: usize = 4;

/// Encode a group into the wire format.
///
/// Fragments are written in order; nested groups recurse. Infallible and
/// deterministic.
pub fn encode_group(group: &Group) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(group));
    write_group(&mut buf, group);
    buf
}

/// Exact size in bytes of [`encode_group`]'s output.
pub fn encoded_len(group: &Group) -> usize {
    group.iter().map(fragment_len).sum()
}

fn fragment_len(fragment: &Fragment) -> usize {
    // Type and length words, the name, then the value.
    8 + text_len(fragment.name()) + value_len(fragment.value())
}

fn value_len(value: &FragmentValue) -> usize {
    match value {
        FragmentValue::Text(text) => text_len(text),
        FragmentValue::Data(data) => data.len(),
        FragmentValue::Time(_) => TIME_LEN,
        FragmentValue::Number(_) => NUMBER_LEN,
        FragmentValue::Group(group) => encoded_len(group),
    }
}

fn text_len(text: &str) -> usize {
    4 + 2 * text.encode_utf16().count()
}

fn write_group(buf: &mut Vec<u8>, group: &Group) {
    for fragment in group {
        write_fragment(buf, fragment);
    }
}

fn write_fragment(buf: &mut Vec<u8>, fragment: &Fragment) {
    let record_len = text_len(fragment.name()) + value_len(fragment.value());
    put_u32(buf, fragment.fragment_type().into());
    put_u32(buf, record_len as u32);
    put_text(buf, fragment.name());

    match fragment.value() {
        FragmentValue::Text(text) => put_text(buf, text),
        FragmentValue::Data(data) => buf.extend_from_slice(data),
        FragmentValue::Time(time) => {
            buf.extend_from_slice(&time.seconds.to_be_bytes());
            buf.extend_from_slice(&time.fraction.to_be_bytes());
        }
        FragmentValue::Number(number) => buf.extend_from_slice(&number.to_be_bytes()),
        FragmentValue::Group(group) => write_group(buf, group),
    }
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_text(buf: &mut Vec<u8>, text: &str) {
    put_u32(buf, text.encode_utf16().count() as u32);
    for unit in text.encode_utf16() {
        buf.extend_from_slice(&unit.to_be_bytes());
    }
}

/// Decode a group from the wire format.
///
/// Total over arbitrary input: malformed records become `"error"` data
/// fragments (see the module docs) rather than errors. Trailing bytes too
/// short to hold another type code end the sequence silently.
pub fn decode_group(buf: &[u8]) -> Group {
    let mut fragments = Vec::new();
    let mut reader = Reader::new(buf);

    while let Some(type_code) = reader.u32() {
        let record = match reader.u32() {
            Some(len) if len as usize <= reader.remaining() => {
                // Infallible: the bound was just checked.
                reader.bytes(len as usize).unwrap_or_default()
            }
            _ => {
                // Declared length missing or longer than the buffer; the
                // rest of the input cannot be trusted.
                fragments.push(recover(reader.rest_all()));
                break;
            }
        };
        if let Some(fragment) = decode_fragment(type_code, record) {
            fragments.push(fragment);
        }
    }

    fragments.into_iter().collect()
}

/// Decode one record body. Returns `None` for well-formed records of
/// unknown type, which are skipped.
fn decode_fragment(type_code: u32, record: &[u8]) -> Option<Fragment> {
    let mut reader = Reader::new(record);

    let Some(name) = reader.text() else {
        return Some(recover(record));
    };

    let Ok(fragment_type) = FragmentType::try_from(type_code) else {
        // Forward compatibility: consume the record, emit nothing.
        return None;
    };

    let value = match fragment_type {
        FragmentType::Text => reader.text().map(FragmentValue::Text),
        FragmentType::Data => Some(FragmentValue::Data(reader.rest_all().to_vec())),
        FragmentType::Time => reader.bytes(TIME_LEN).map(|raw| {
            FragmentValue::Time(Timestamp {
                seconds: i64::from_be_bytes(raw[..8].try_into().unwrap_or_default()),
                fraction: u64::from_be_bytes(raw[8..].try_into().unwrap_or_default()),
            })
        }),
        FragmentType::Number => reader.bytes(NUMBER_LEN).map(|raw| {
            FragmentValue::Number(i32::from_be_bytes(raw.try_into().unwrap_or_default()))
        }),
        FragmentType::Group => Some(FragmentValue::Group(decode_group(reader.rest_all()))),
    };

    match value {
        Some(value) if reader.remaining() == 0 => Some(Fragment::new(name, value)),
        // Short value, or residual bytes after the claimed value.
        _ => Some(recover(reader.rest())),
    }
}

fn recover(undecoded: &[u8]) -> Fragment {
    warn!("invalid message fragment");
    Fragment::data(ERROR_FRAGMENT_NAME, undecoded)
}

/// Bounds-checked big-endian read cursor. Every read either yields a value
/// or fails closed, leaving the unconsumed remainder available for
/// recovery fragments.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The unconsumed remainder, without consuming it.
    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// The unconsumed remainder, consuming it.
    fn rest_all(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.remaining() {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(out)
    }

    fn u32(&mut self) -> Option<u32> {
        let raw = self.bytes(4)?;
        Some(u32::from_be_bytes(raw.try_into().unwrap_or_default()))
    }

    /// Length-prefixed UTF-16 text. Fails on a short buffer or unpaired
    /// surrogates.
    fn text(&mut self) -> Option<String> {
        let count = self.u32()? as usize;
        let raw = self.bytes(count.checked_mul(2)?)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes(pair.try_into().unwrap_or_default()))
            .collect();
        String::from_utf16(&units).ok()
    }
}

#[cfg(test)]
mod tests {
    use crate::fragment::{Fragment, FragmentValue, Timestamp};
    use crate::group::Group;

    use super::{ERROR_FRAGMENT_NAME, decode_group, encode_group, encoded_len};

    fn sample_group() -> Group {
        let nested: Group = [
            Fragment::text("subject", "hello, world"),
            Fragment::number("sequence", -42),
        ]
        .into_iter()
        .collect();

        [
            Fragment::text("from", "alice@example.org"),
            Fragment::data("payload", vec![0, 1, 2, 254, 255]),
            Fragment::time(
                "sent",
                Timestamp {
                    seconds: 877_305_600,
                    fraction: 1 << 60,
                },
            ),
            Fragment::number("priority", 3),
            Fragment::group("body", nested),
        ]
        .into_iter()
        .collect()
    }

    fn error_fragments(group: &Group) -> usize {
        group
            .iter()
            .filter(|fragment| fragment.name() == ERROR_FRAGMENT_NAME)
            .count()
    }

    #[test]
    fn round_trip() {
        let group = sample_group();
        let encoded = encode_group(&group);
        assert_eq!(encoded.len(), encoded_len(&group));
        assert_eq!(decode_group(&encoded), group);
    }

    #[test]
    fn round_trip_empty() {
        assert!(encode_group(&Group::new()).is_empty());
        assert!(decode_group(&[]).is_empty());
    }

    #[test]
    fn round_trip_non_ascii_text() {
        let group: Group = [Fragment::text("subject", "griffe \u{00e9}\u{20ac}\u{1f310}")]
            .into_iter()
            .collect();
        assert_eq!(decode_group(&encode_group(&group)), group);
    }

    #[test]
    fn declared_length_beyond_buffer_recovers() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes()); // type: text
        buf.extend_from_slice(&1000u32.to_be_bytes()); // length: far too long
        buf.extend_from_slice(&[1, 2, 3, 4]);

        let group = decode_group(&buf);
        assert_eq!(group.len(), 1);
        let fragment = group.first();
        assert_eq!(fragment.name(), ERROR_FRAGMENT_NAME);
        assert_eq!(fragment.value(), &FragmentValue::Data(vec![1, 2, 3, 4]));
    }

    #[test]
    fn truncated_length_field_recovers() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&[0, 0]); // half a length word

        let group = decode_group(&buf);
        assert_eq!(error_fragments(&group), 1);
    }

    #[test]
    fn trailing_bytes_too_short_for_a_type_are_ignored() {
        let mut buf = encode_group(&sample_group());
        buf.extend_from_slice(&[0, 0, 0]);
        assert_eq!(decode_group(&buf), sample_group());
    }

    #[test]
    fn residual_bytes_inside_a_record_recover() {
        // A number record claiming 6 value bytes: 4 parse, 2 are left over.
        let mut buf = Vec::new();
        buf.extend_from_slice(&3u32.to_be_bytes()); // type: number
        buf.extend_from_slice(&12u32.to_be_bytes()); // name (6) + value (4) + residue (2)
        buf.extend_from_slice(&1u32.to_be_bytes()); // name length: 1 unit
        buf.extend_from_slice(&[0, b'n']);
        buf.extend_from_slice(&7i32.to_be_bytes());
        buf.extend_from_slice(&[9, 9]);

        let group = decode_group(&buf);
        assert_eq!(group.len(), 1);
        assert_eq!(group.first().name(), ERROR_FRAGMENT_NAME);
        assert_eq!(group.first().value(), &FragmentValue::Data(vec![9, 9]));
    }

    #[test]
    fn unknown_type_with_valid_name_is_skipped() {
        let known = encode_group(&sample_group());

        let mut buf = Vec::new();
        buf.extend_from_slice(&9u32.to_be_bytes()); // type from the future
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes()); // name length: 1 unit
        buf.extend_from_slice(&[0, b'x']);
        buf.extend_from_slice(&[1, 2, 3, 4]); // opaque future payload
        buf.extend_from_slice(&known);

        assert_eq!(decode_group(&buf), sample_group());
    }

    #[test]
    fn unknown_type_with_bad_name_recovers() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&9u32.to_be_bytes());
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&100u32.to_be_bytes()); // name length beyond the record
        buf.extend_from_slice(&[0, b'x', 0, b'y']);

        let group = decode_group(&buf);
        assert_eq!(error_fragments(&group), 1);
    }

    #[test]
    fn malformed_record_does_not_poison_followers() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_be_bytes()); // type: time
        buf.extend_from_slice(&8u32.to_be_bytes()); // name (6) + 2 bytes: short for a time
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&[0, b't']);
        buf.extend_from_slice(&[1, 2]);
        buf.extend_from_slice(&encode_group(&sample_group()));

        let group = decode_group(&buf);
        assert_eq!(group.first().name(), ERROR_FRAGMENT_NAME);
        assert_eq!(group.rest(), sample_group());
    }

    #[test]
    fn nested_group_errors_stay_nested() {
        // A group-typed record whose content is one malformed record.
        let mut inner = Vec::new();
        inner.extend_from_slice(&3u32.to_be_bytes()); // number
        inner.extend_from_slice(&500u32.to_be_bytes()); // length overruns
        inner.extend_from_slice(&[5, 6, 7, 8]);

        let mut buf = Vec::new();
        buf.extend_from_slice(&4u32.to_be_bytes()); // type: group
        buf.extend_from_slice(&((6 + inner.len()) as u32).to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&[0, b'g']);
        buf.extend_from_slice(&inner);

        let group = decode_group(&buf);
        assert_eq!(group.len(), 1);
        let fragment = group.first();
        assert_eq!(fragment.name(), "g");
        let FragmentValue::Group(nested) = fragment.value() else {
            panic!("expected a nested group");
        };
        assert_eq!(error_fragments(nested), 1);
    }

    #[test]
    fn deep_nesting_round_trips() {
        let mut group: Group = [Fragment::number("leaf", 1)].into_iter().collect();
        for _ in 0..64 {
            group = [Fragment::group("level", group)].into_iter().collect();
        }
        assert_eq!(decode_group(&encode_group(&group)), group);
    }
}
