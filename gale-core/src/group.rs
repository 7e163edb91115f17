// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered, immutable sequences of fragments with structural sharing.

use std::fmt;
use std::sync::Arc;

use serde::de::SeqAccess;
use serde::{Deserialize, Serialize};

use crate::fragment::Fragment;

/// One logical message's content: an ordered sequence of [`Fragment`]s.
///
/// Semantically an ordered multimap from name to fragment; names may repeat
/// and order is significant. A group is an immutable value: every "mutating"
/// operation returns a new group that shares unaffected structure with the
/// original, so older views stay valid and prepending is cheap.
///
/// Internally a group is a chain of shared array segments. A view holds one
/// segment (possibly advanced past consumed elements) and an optional
/// continuation. Emptiness is structural, not representational: a view with
/// an exhausted segment but a non-empty continuation is not empty, and
/// [`Group::is_empty`] recurses the whole chain.
#[derive(Clone)]
pub struct Group {
    list: Arc<[Fragment]>,
    start: usize,
    next: Option<Arc<Group>>,
}

impl Group {
    /// The empty group.
    pub fn new() -> Self {
        Self {
            list: Arc::new([]),
            start: 0,
            next: None,
        }
    }

    fn segment(&self) -> &[Fragment] {
        &self.list[self.start..]
    }

    /// True iff the group holds no fragments anywhere along its chain.
    pub fn is_empty(&self) -> bool {
        self.segment().is_empty()
            && match &self.next {
                Some(next) => next.is_empty(),
                None => true,
            }
    }

    /// Total number of fragments.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// The head fragment.
    ///
    /// # Panics
    ///
    /// Panics if the group is empty; check [`Group::is_empty`] first when
    /// uncertain.
    pub fn first(&self) -> &Fragment {
        let mut node = self;
        loop {
            if let Some(fragment) = node.segment().first() {
                return fragment;
            }
            match &node.next {
                Some(next) => node = next,
                None => panic!("first fragment of an empty group"),
            }
        }
    }

    /// Everything after the head fragment.
    ///
    /// # Panics
    ///
    /// Panics if the group is empty; check [`Group::is_empty`] first when
    /// uncertain.
    #[must_use]
    pub fn rest(&self) -> Group {
        let mut node = self;
        loop {
            if !node.segment().is_empty() {
                return Group {
                    list: node.list.clone(),
                    start: node.start + 1,
                    next: node.next.clone(),
                };
            }
            match &node.next {
                Some(next) => node = next,
                None => panic!("rest of an empty group"),
            }
        }
    }

    /// New group with `fragment` prepended.
    #[must_use]
    pub fn add(&self, fragment: Fragment) -> Group {
        Group {
            list: Arc::new([fragment]),
            start: 0,
            next: Some(Arc::new(self.clone())),
        }
    }

    /// New group holding `self`'s fragments followed by `other`'s.
    ///
    /// `self`'s chain is flattened into a single fresh segment; `other` is
    /// shared as the continuation.
    #[must_use]
    pub fn append(&self, other: &Group) -> Group {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }

        let mut flat = Vec::with_capacity(self.len());
        let mut node = self;
        loop {
            flat.extend_from_slice(node.segment());
            match &node.next {
                Some(next) => node = next,
                None => break,
            }
        }

        Group {
            list: Arc::from(flat),
            start: 0,
            next: Some(Arc::new(other.clone())),
        }
    }

    /// The suffix of this group starting at the first fragment named `name`,
    /// or the empty group if there is none. Comparison is exact.
    ///
    /// The returned cursor shares structure with `self` and can be fed back
    /// to [`Group::prefix`] or advanced with [`Group::rest`].
    #[must_use]
    pub fn find(&self, name: &str) -> Group {
        let mut cursor = self.clone();
        while !cursor.is_empty() && cursor.first().name() != name {
            cursor = cursor.rest();
        }
        cursor
    }

    /// The fragments of `self` that precede `suffix`.
    ///
    /// `suffix` must be a structural tail of `self`, as returned by
    /// [`Group::find`] or [`Group::rest`].
    ///
    /// # Panics
    ///
    /// Panics if `suffix` is not reachable as a tail of `self`.
    #[must_use]
    pub fn prefix(&self, suffix: &Group) -> Group {
        // Every fragment of the group precedes an empty suffix.
        if suffix.is_empty() {
            return self.clone();
        }

        let mut flat = Vec::new();
        let mut node = self;
        loop {
            let same_continuation = match (&node.next, &suffix.next) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if same_continuation && Arc::ptr_eq(&node.list, &suffix.list) {
                assert!(
                    node.start <= suffix.start,
                    "suffix is not a tail of this group"
                );
                flat.extend_from_slice(&node.list[node.start..suffix.start]);
                return Group::from_iter(flat);
            }

            flat.extend_from_slice(node.segment());
            match &node.next {
                Some(next) => node = next,
                None => panic!("suffix is not a tail of this group"),
            }
        }
    }

    /// New group with every fragment named `name` removed, together with the
    /// number of fragments removed. Relative order of the remaining
    /// fragments is preserved.
    #[must_use]
    pub fn remove(&self, name: &str) -> (Group, usize) {
        let mut out = Group::new();
        let mut rest = self.clone();
        let mut count = 0;

        loop {
            let found = rest.find(name);
            if found.is_empty() {
                break;
            }
            out = out.append(&rest.prefix(&found));
            rest = found.rest();
            count += 1;
        }

        (out.append(&rest), count)
    }

    /// New group where `fragment` replaces every fragment sharing its name.
    ///
    /// The replacement sits where the first original match sat; with no
    /// match it becomes the new head. At most one fragment with the name
    /// survives.
    #[must_use]
    pub fn replace(&self, fragment: Fragment) -> Group {
        let found = self.find(fragment.name());
        if found.is_empty() {
            return self.add(fragment);
        }
        let before = self.prefix(&found);
        let (after, _) = found.rest().remove(fragment.name());
        before.append(&after.add(fragment))
    }

    /// Iterate the fragments in order.
    pub fn iter(&self) -> Fragments<'_> {
        Fragments {
            node: Some(self),
            index: self.start,
        }
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a group's fragments, front to back.
pub struct Fragments<'a> {
    node: Option<&'a Group>,
    index: usize,
}

impl<'a> Iterator for Fragments<'a> {
    type Item = &'a Fragment;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node?;
            if self.index < node.list.len() {
                let fragment = &node.list[self.index];
                self.index += 1;
                return Some(fragment);
            }
            self.node = node.next.as_deref();
            self.index = self.node.map_or(0, |next| next.start);
        }
    }
}

impl<'a> IntoIterator for &'a Group {
    type Item = &'a Fragment;
    type IntoIter = Fragments<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Fragment> for Group {
    fn from_iter<I: IntoIterator<Item = Fragment>>(iter: I) -> Self {
        let list: Vec<Fragment> = iter.into_iter().collect();
        Group {
            list: Arc::from(list),
            start: 0,
            next: None,
        }
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Serialize for Group {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for Group {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct GroupVisitor;

        impl<'de> serde::de::Visitor<'de> for GroupVisitor {
            type Value = Group;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a sequence of fragments")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut fragments = Vec::new();
                while let Some(fragment) = seq.next_element::<Fragment>()? {
                    fragments.push(fragment);
                }
                Ok(Group::from_iter(fragments))
            }
        }

        deserializer.deserialize_seq(GroupVisitor)
    }
}
