//! Typed resolution contexts.
//!
//! A context carries the concrete values a pattern may substitute. It is
//! built from content records and checked against the pattern before any
//! substitution happens, so a missing value surfaces as
//! [`ResolveError::InvalidPattern`] at the boundary.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::pattern::{ContextType, PathPattern, Token};
use super::ResolveError;
use crate::content::{Author, Category, Page};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageContext {
    pub page_id: i64,
    pub basename: String,
    pub publication_date: Option<DateTime<Utc>>,
    /// Primary category basename.
    pub category: Option<String>,
    /// Author basename.
    pub author: Option<String>,
}

/// Values shared by every page listed on one archive output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveContext {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub category: Option<String>,
    pub author: Option<String>,
}

impl ArchiveContext {
    /// Builds the context for an archive key. `category` and `author` must be
    /// the records the key's ids refer to.
    pub fn from_key(
        key: &ArchiveKey,
        category: Option<&Category>,
        author: Option<&Author>,
    ) -> Self {
        Self {
            year: key.year,
            month: key.month,
            day: key.day,
            category: category.map(|c| c.basename.clone()),
            author: author.map(|a| a.basename.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionContext {
    Page(PageContext),
    /// Blog-level output with no page (indexes and includes).
    Index,
    Archive(ArchiveContext),
}

impl ResolutionContext {
    pub fn for_page(page: &Page, category: Option<&Category>, author: Option<&Author>) -> Self {
        Self::Page(PageContext {
            page_id: page.id,
            basename: page.basename.clone(),
            publication_date: page.publication_date,
            category: category.map(|c| c.basename.clone()),
            author: author.map(|a| a.basename.clone()),
        })
    }

    pub fn page_id(&self) -> Option<i64> {
        match self {
            Self::Page(page) => Some(page.page_id),
            Self::Index | Self::Archive(_) => None,
        }
    }

    /// The substitution value for a placeholder, if this context has one.
    pub fn value(&self, token: &Token) -> Option<String> {
        match (self, token) {
            (_, Token::Literal(text)) => Some(text.clone()),
            (Self::Page(page), Token::Year) => {
                page.publication_date.map(|d| format!("{:04}", d.year()))
            }
            (Self::Page(page), Token::Month) => {
                page.publication_date.map(|d| format!("{:02}", d.month()))
            }
            (Self::Page(page), Token::Day) => {
                page.publication_date.map(|d| format!("{:02}", d.day()))
            }
            (Self::Page(page), Token::Category) => page.category.clone(),
            (Self::Page(page), Token::Author) => page.author.clone(),
            (Self::Page(page), Token::Basename) => Some(page.basename.clone()),
            (Self::Page(page), Token::Id) => Some(page.page_id.to_string()),
            (Self::Archive(archive), Token::Year) => archive.year.map(|y| format!("{:04}", y)),
            (Self::Archive(archive), Token::Month) => archive.month.map(|m| format!("{:02}", m)),
            (Self::Archive(archive), Token::Day) => archive.day.map(|d| format!("{:02}", d)),
            (Self::Archive(archive), Token::Category) => archive.category.clone(),
            (Self::Archive(archive), Token::Author) => archive.author.clone(),
            (Self::Archive(_), Token::Basename | Token::Id) => None,
            (Self::Index, _) => None,
        }
    }

    /// Verifies every placeholder in `pattern` has a usable value.
    pub fn check(&self, pattern: &PathPattern) -> Result<(), ResolveError> {
        for token in pattern.tokens() {
            if matches!(token, Token::Literal(_)) {
                continue;
            }
            match self.value(token) {
                None => {
                    return Err(ResolveError::invalid(
                        pattern.source(),
                        format!("'{}' has no value for {}", token, self.describe()),
                    ))
                }
                Some(value) if value.is_empty() || value.contains('/') => {
                    return Err(ResolveError::invalid(
                        pattern.source(),
                        format!("'{}' expands to unusable path segment '{}'", token, value),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match self {
            Self::Page(page) => format!("page #{}", page.page_id),
            Self::Index => "a blog-level output".to_string(),
            Self::Archive(_) => "this archive".to_string(),
        }
    }
}

/// Identifies one archive output of a mapping.
///
/// Only the components the mapping's pattern uses are set, so every page of
/// the same month (say) produces the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<i64>,
}

impl ArchiveKey {
    /// The archive of `pattern` that lists `page`, or `None` when the page
    /// lacks a value the pattern needs.
    pub fn for_page(page: &Page, pattern: &PathPattern) -> Option<Self> {
        let mut key = Self::default();

        let needs_date = pattern.uses(ContextType::Year)
            || pattern.uses(ContextType::Month)
            || pattern.uses(ContextType::Day);
        if needs_date {
            let date = page.publication_date?;
            key.year = Some(date.year());
            if pattern.uses(ContextType::Month) || pattern.uses(ContextType::Day) {
                key.month = Some(date.month());
            }
            if pattern.uses(ContextType::Day) {
                key.day = Some(date.day());
            }
        }
        if pattern.uses(ContextType::Category) {
            key.category_id = Some(page.primary_category_id?);
        }
        if pattern.uses(ContextType::Author) {
            key.author_id = Some(page.author_id?);
        }

        Some(key)
    }

    /// Whether `page` belongs on this archive.
    pub fn matches(&self, page: &Page) -> bool {
        let date = page.publication_date;
        let date_ok = match (self.year, date) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(year), Some(d)) => {
                d.year() == year
                    && self.month.map_or(true, |m| d.month() == m)
                    && self.day.map_or(true, |day| d.day() == day)
            }
        };
        date_ok
            && self.category_id.map_or(true, |c| page.primary_category_id == Some(c))
            && self.author_id.map_or(true, |a| page.author_id == Some(a))
    }

    /// Queue descriptor for this key.
    pub fn to_descriptor(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_descriptor(descriptor: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(descriptor)
    }
}
