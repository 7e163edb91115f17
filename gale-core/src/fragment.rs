// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named, typed values carried inside a [`Group`].

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::group::Group;

/// Wire type codes for the five known fragment types.
///
/// Codes above [`FragmentType::Group`] are reserved for future protocol
/// revisions; the decoder skips them without failing the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentType {
    Text = 0,
    Data = 1,
    Time = 2,
    Number = 3,
    Group = 4,
}

impl TryFrom<u32> for FragmentType {
    type Error = UnknownFragmentType;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FragmentType::Text),
            1 => Ok(FragmentType::Data),
            2 => Ok(FragmentType::Time),
            3 => Ok(FragmentType::Number),
            4 => Ok(FragmentType::Group),
            code => Err(UnknownFragmentType(code)),
        }
    }
}

impl From<FragmentType> for u32 {
    fn from(value: FragmentType) -> u32 {
        value as u32
    }
}

/// A wire type code outside the known range.
#[derive(Debug, Error)]
#[error("unknown fragment type code {0}")]
pub struct UnknownFragmentType(pub u32);

/// Point in time as carried on the wire: whole seconds since the Unix epoch
/// and a 64-bit binary fraction of a second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub fraction: u64,
}

impl Timestamp {
    /// The epoch itself.
    pub const fn zero() -> Self {
        Self {
            seconds: 0,
            fraction: 0,
        }
    }

    /// A time later than any other; used as an "expires never" marker.
    pub const fn forever() -> Self {
        Self {
            seconds: i64::MAX,
            fraction: u64::MAX,
        }
    }

    pub const fn from_seconds(seconds: i64) -> Self {
        Self {
            seconds,
            fraction: 0,
        }
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Self {
                seconds: elapsed.as_secs() as i64,
                // Scale nanoseconds up to a binary fraction of a second.
                fraction: (elapsed.subsec_nanos() as u64) << 34,
            },
            Err(before_epoch) => Self {
                seconds: -(before_epoch.duration().as_secs() as i64),
                fraction: 0,
            },
        }
    }
}

/// The value half of a [`Fragment`], tagged with its wire type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FragmentValue {
    /// Human-readable text.
    Text(String),
    /// Opaque bytes.
    Data(Vec<u8>),
    /// A point in time.
    Time(Timestamp),
    /// A signed 32-bit integer.
    Number(i32),
    /// A nested group.
    Group(Group),
}

impl FragmentValue {
    pub fn fragment_type(&self) -> FragmentType {
        match self {
            FragmentValue::Text(_) => FragmentType::Text,
            FragmentValue::Data(_) => FragmentType::Data,
            FragmentValue::Time(_) => FragmentType::Time,
            FragmentValue::Number(_) => FragmentType::Number,
            FragmentValue::Group(_) => FragmentType::Group,
        }
    }
}

impl From<&str> for FragmentValue {
    fn from(value: &str) -> Self {
        FragmentValue::Text(value.to_string())
    }
}

impl From<String> for FragmentValue {
    fn from(value: String) -> Self {
        FragmentValue::Text(value)
    }
}

impl From<Vec<u8>> for FragmentValue {
    fn from(value: Vec<u8>) -> Self {
        FragmentValue::Data(value)
    }
}

impl From<&[u8]> for FragmentValue {
    fn from(value: &[u8]) -> Self {
        FragmentValue::Data(value.to_vec())
    }
}

impl From<Timestamp> for FragmentValue {
    fn from(value: Timestamp) -> Self {
        FragmentValue::Time(value)
    }
}

impl From<i32> for FragmentValue {
    fn from(value: i32) -> Self {
        FragmentValue::Number(value)
    }
}

impl From<Group> for FragmentValue {
    fn from(value: Group) -> Self {
        FragmentValue::Group(value)
    }
}

/// A named, typed value. Immutable once constructed.
///
/// Names are not unique within a group; a group is an ordered multimap.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    name: String,
    value: FragmentValue,
}

impl Fragment {
    /// Build a fragment from a name and anything convertible to a value.
    pub fn new(name: impl Into<String>, value: impl Into<FragmentValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, FragmentValue::Text(value.into()))
    }

    pub fn data(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(name, FragmentValue::Data(value.into()))
    }

    pub fn time(name: impl Into<String>, value: Timestamp) -> Self {
        Self::new(name, FragmentValue::Time(value))
    }

    pub fn number(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, FragmentValue::Number(value))
    }

    pub fn group(name: impl Into<String>, value: Group) -> Self {
        Self::new(name, FragmentValue::Group(value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &FragmentValue {
        &self.value
    }

    pub fn fragment_type(&self) -> FragmentType {
        self.value.fragment_type()
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Fragment, FragmentType, FragmentValue, Timestamp};

    #[test]
    fn type_codes_round_trip() {
        for code in 0..5u32 {
            let fragment_type = FragmentType::try_from(code).unwrap();
            assert_eq!(u32::from(fragment_type), code);
        }
        assert!(FragmentType::try_from(5).is_err());
        assert!(FragmentType::try_from(u32::MAX).is_err());
    }

    #[test]
    fn value_carries_type() {
        assert_eq!(
            Fragment::text("subject", "hello").fragment_type(),
            FragmentType::Text
        );
        assert_eq!(
            Fragment::data("payload", vec![1, 2]).fragment_type(),
            FragmentType::Data
        );
        assert_eq!(
            Fragment::time("sent", Timestamp::zero()).fragment_type(),
            FragmentType::Time
        );
        assert_eq!(
            Fragment::number("sequence", -7).fragment_type(),
            FragmentType::Number
        );
    }

    #[test]
    fn timestamps_are_ordered() {
        let early = Timestamp::from_seconds(100);
        let late = Timestamp {
            seconds: 100,
            fraction: 1,
        };
        assert!(Timestamp::zero() < early);
        assert!(early < late);
        assert!(late < Timestamp::forever());
    }

    #[test]
    fn serde_round_trip() {
        let fragment = Fragment::new("sequence", 42);
        let json = serde_json::to_string(&fragment).unwrap();
        let decoded: Fragment = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, fragment);
        assert_eq!(decoded.value(), &FragmentValue::Number(42));
    }
}
