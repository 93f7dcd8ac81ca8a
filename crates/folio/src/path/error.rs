use std::fmt;

use thiserror::Error;

use crate::db::DatabaseError;

/// The content item a resolved path belongs to.
///
/// Pages are identified by (page, mapping). Index and archive outputs have no
/// page and are identified by their mapping alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentRef {
    pub page_id: Option<i64>,
    pub mapping_id: i64,
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page_id {
            Some(page_id) => write!(f, "page #{} via mapping #{}", page_id, self.mapping_id),
            None => write!(f, "mapping #{}", self.mapping_id),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Path '{path}' is already published by {existing}; refusing to overwrite it with {incoming}")]
    PathCollision {
        path: String,
        existing: ContentRef,
        incoming: ContentRef,
    },

    #[error("Collision lookup failed: {0}")]
    Database(#[from] DatabaseError),
}

impl ResolveError {
    pub(crate) fn invalid(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}
