//! Output path resolution.
//!
//! A template mapping's pattern plus a typed context yields the file path,
//! sitewide path and URL of one output, along with the context tags used
//! for next/previous archive queries.

pub mod basename;
pub mod context;
pub mod error;
pub mod pattern;
pub mod resolver;

pub use basename::{create_basename, unique_basename, MIN_BASENAME_LENGTH};
pub use context::{ArchiveContext, ArchiveKey, PageContext, ResolutionContext};
pub use error::{ContentRef, ResolveError};
pub use pattern::{ContextType, PathPattern, Token};
pub use resolver::{resolve_pattern, ContextTag, FileInfoLookup, PathResolver, ResolvedPath};
