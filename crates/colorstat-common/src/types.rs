//! Core type definitions for colorstat
//!
//! This module defines the identifiers a statistics entry is keyed by and
//! the fixed-width composite [`Key`] built from them.

use crate::error::{Error, Result};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of the NUL-padded tag field of a [`Key`]
pub const TAG_LEN: usize = 64;

/// Longest tag (in bytes) a key keeps; the last byte is always NUL
pub const MAX_TAG_BYTES: usize = TAG_LEN - 1;

/// Identifier of the user that ran a query
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct UserId(u32);

impl UserId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Identifier of the database a query ran in
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct DbId(u32);

impl DbId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Normalized query fingerprint assigned by the host
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct QueryId(u64);

impl QueryId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Composite key of a usage statistics entry
///
/// A key is `(user, database, query, tag)` where the tag is the canonical
/// text of the filter value the query was planned with. The tag is stored
/// inline as a NUL-padded byte array so every key has the same size and two
/// keys are equal iff all four fields match byte-for-byte.
///
/// Tags longer than [`MAX_TAG_BYTES`] are silently truncated at the last
/// character boundary that fits. Distinct long tags sharing a prefix
/// therefore collapse onto the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    user_id: UserId,
    db_id: DbId,
    query_id: QueryId,
    tag: [u8; TAG_LEN],
}

impl Key {
    /// Build a key, bounding and padding the tag
    ///
    /// `None` and `Some("")` produce the same key. Anything after an
    /// embedded NUL is dropped.
    #[must_use]
    pub fn new(user_id: UserId, db_id: DbId, query_id: QueryId, tag: Option<&str>) -> Self {
        let mut buf = [0u8; TAG_LEN];
        if let Some(tag) = tag {
            let tag = bound_tag(tag);
            buf[..tag.len()].copy_from_slice(tag.as_bytes());
        }
        Self {
            user_id,
            db_id,
            query_id,
            tag: buf,
        }
    }

    /// Rebuild a key from its raw tag field (snapshot decoding)
    ///
    /// The field must hold valid UTF-8 followed only by NUL padding, and its
    /// final byte must be NUL.
    pub fn from_raw(
        user_id: UserId,
        db_id: DbId,
        query_id: QueryId,
        tag: [u8; TAG_LEN],
    ) -> Result<Self> {
        let len = tag.iter().position(|&b| b == 0).ok_or_else(|| {
            Error::invalid_argument("tag field is not NUL-terminated")
        })?;
        if tag[len..].iter().any(|&b| b != 0) {
            return Err(Error::invalid_argument("tag field has data after padding"));
        }
        std::str::from_utf8(&tag[..len])
            .map_err(|e| Error::invalid_argument(format!("tag is not valid UTF-8: {e}")))?;
        Ok(Self {
            user_id,
            db_id,
            query_id,
            tag,
        })
    }

    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub const fn db_id(&self) -> DbId {
        self.db_id
    }

    #[must_use]
    pub const fn query_id(&self) -> QueryId {
        self.query_id
    }

    /// The `(user, database, query)` triple, without the tag
    #[must_use]
    pub const fn query_triple(&self) -> (UserId, DbId, QueryId) {
        (self.user_id, self.db_id, self.query_id)
    }

    /// Raw NUL-padded tag field
    #[must_use]
    pub const fn tag_bytes(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }

    /// Tag text, or `None` when the key was recorded without a filter value
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        let len = self.tag_len();
        if len == 0 {
            return None;
        }
        // Constructors only ever store valid UTF-8
        std::str::from_utf8(&self.tag[..len]).ok()
    }

    fn tag_len(&self) -> usize {
        self.tag.iter().position(|&b| b == 0).unwrap_or(TAG_LEN)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("user_id", &self.user_id)
            .field("db_id", &self.db_id)
            .field("query_id", &self.query_id)
            .field("tag", &self.tag())
            .finish()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.db_id, self.query_id)?;
        if let Some(tag) = self.tag() {
            write!(f, "/{tag}")?;
        }
        Ok(())
    }
}

/// Cut a tag at the first NUL and at the last char boundary within the bound
fn bound_tag(tag: &str) -> &str {
    let tag = tag.split('\0').next().unwrap_or_default();
    if tag.len() <= MAX_TAG_BYTES {
        return tag;
    }
    let mut end = MAX_TAG_BYTES;
    while !tag.is_char_boundary(end) {
        end -= 1;
    }
    &tag[..end]
}
