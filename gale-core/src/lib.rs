// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content model and binary wire codec for Gale messages.
//!
//! A message's content is a [`Group`]: an ordered sequence of named, typed
//! [`Fragment`] values which may nest further groups without a fixed schema.
//! Groups are immutable values with structural sharing, so building up or
//! taking apart message content never copies more than it has to.
//!
//! The [`wire`] module carries groups across the network in the deployed
//! tagged-length-value format. Decoding is defensive: malformed records
//! degrade into `"error"` data fragments instead of failing the message.

pub mod fragment;
pub mod group;
pub mod wire;

pub use fragment::{Fragment, FragmentType, FragmentValue, Timestamp};
pub use group::Group;
pub use wire::{decode_group, encode_group, encoded_len};
