use super::context::ResolutionContext;
use super::error::ContentRef;
use super::pattern::{ContextType, PathPattern};
use super::ResolveError;
use crate::content::{Blog, TemplateMapping};
use crate::db::fileinfo_repo::FileInfo;
use crate::db::DatabaseError;

/// Read-only view of the FileInfo store used for collision checks.
pub trait FileInfoLookup {
    fn fileinfo_at(&self, sitewide_file_path: &str) -> Result<Option<FileInfo>, DatabaseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTag {
    pub context_type: ContextType,
    pub value: String,
    pub position: usize,
}

/// The output location of one (content item, mapping) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Relative to the blog root.
    pub file_path: String,
    pub sitewide_file_path: String,
    pub url: String,
    /// Sorted by position in the pattern.
    pub context_tags: Vec<ContextTag>,
    pub owner: ContentRef,
}

impl ResolvedPath {
    pub fn signature(&self) -> String {
        self.context_tags
            .iter()
            .map(|tag| tag.context_type.letter())
            .collect()
    }

    /// Context values in position order, joined with '/'.
    pub fn context_key(&self) -> String {
        self.context_tags
            .iter()
            .map(|tag| tag.value.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Resolves mapping patterns against contexts, refusing paths that another
/// content item already owns.
pub struct PathResolver<'a, L: ?Sized> {
    lookup: &'a L,
}

impl<'a, L: FileInfoLookup + ?Sized> PathResolver<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    pub fn resolve(
        &self,
        blog: &Blog,
        mapping: &TemplateMapping,
        context: &ResolutionContext,
    ) -> Result<ResolvedPath, ResolveError> {
        let pattern = PathPattern::parse(&mapping.path_string)?;
        let resolved = resolve_pattern(blog, mapping.id, &pattern, context)?;

        if let Some(existing) = self.lookup.fileinfo_at(&resolved.sitewide_file_path)? {
            let existing_owner = existing.owner();
            if existing_owner != resolved.owner {
                return Err(ResolveError::PathCollision {
                    path: resolved.sitewide_file_path,
                    existing: existing_owner,
                    incoming: resolved.owner,
                });
            }
        }

        Ok(resolved)
    }
}

/// Substitutes `context` into `pattern` without consulting the FileInfo
/// store.
pub fn resolve_pattern(
    blog: &Blog,
    mapping_id: i64,
    pattern: &PathPattern,
    context: &ResolutionContext,
) -> Result<ResolvedPath, ResolveError> {
    context.check(pattern)?;

    let mut raw = String::new();
    for token in pattern.tokens() {
        if let Some(value) = context.value(token) {
            raw.push_str(&value);
        }
    }

    let file_path = normalize(pattern.source(), &raw, &blog.index_file)?;

    let context_tags = pattern
        .context_types()
        .into_iter()
        .filter_map(|(context_type, position)| {
            context.value(&context_type.token()).map(|value| ContextTag {
                context_type,
                value,
                position,
            })
        })
        .collect();

    Ok(ResolvedPath {
        sitewide_file_path: join_root(&blog.path, &file_path),
        url: format!("{}/{}", blog.url.trim_end_matches('/'), file_path),
        file_path,
        context_tags,
        owner: ContentRef {
            page_id: context.page_id(),
            mapping_id,
        },
    })
}

fn normalize(pattern: &str, raw: &str, index_file: &str) -> Result<String, ResolveError> {
    let directory_style = raw.is_empty() || raw.ends_with('/');

    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" => continue,
            "." | ".." => {
                return Err(ResolveError::invalid(
                    pattern,
                    format!("relative segment '{}' in '{}'", segment, raw),
                ))
            }
            _ => segments.push(segment),
        }
    }
    if directory_style {
        segments.push(index_file);
    }

    Ok(segments.join("/"))
}

fn join_root(root: &str, file_path: &str) -> String {
    let mut collapsed = String::with_capacity(root.len());
    for c in root.chars() {
        if c == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(c);
    }
    format!("{}/{}", collapsed.trim_end_matches('/'), file_path)
}
