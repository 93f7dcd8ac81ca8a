//! Content records the publishing engine reads.
//!
//! Sites, blogs, pages, templates and their mappings are edited elsewhere;
//! this module only describes their shape and the read interface the queue
//! runner needs ([`ContentStore`]). [`crate::db::Database`] implements it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::DatabaseError;
use crate::path::ArchiveKey;

/// Identifies the blog (and its site) a queue operation is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlogRef {
    pub blog_id: i64,
    pub site_id: i64,
}

impl fmt::Display for BlogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blog {} (site {})", self.blog_id, self.site_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blog {
    pub id: i64,
    pub site_id: i64,
    pub name: String,
    /// Public base URL.
    pub url: String,
    /// Filesystem root the blog publishes into.
    pub path: String,
    /// File name appended to directory-style output paths.
    pub index_file: String,
}

impl Blog {
    pub fn owner(&self) -> BlogRef {
        BlogRef {
            blog_id: self.id,
            site_id: self.site_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Draft,
    Published,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub id: i64,
    pub blog_id: i64,
    pub title: String,
    pub basename: String,
    pub status: PageStatus,
    pub publication_date: Option<DateTime<Utc>>,
    pub author_id: Option<i64>,
    pub primary_category_id: Option<i64>,
    pub text: String,
}

impl Page {
    pub fn is_published(&self) -> bool {
        self.status == PageStatus::Published
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: i64,
    pub blog_id: i64,
    pub title: String,
    pub basename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub basename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateType {
    Page,
    Index,
    Archive,
    Include,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishingMode {
    /// Published whenever dependent content changes.
    Immediate,
    /// Published only on an explicit request or a full republish.
    Manual,
    DoNotPublish,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    pub id: i64,
    pub blog_id: i64,
    pub title: String,
    pub template_type: TemplateType,
    pub body: String,
    pub publishing_mode: PublishingMode,
}

impl Template {
    pub fn publishes(&self) -> bool {
        self.publishing_mode != PublishingMode::DoNotPublish
    }
}

/// What a mapping's output enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArchiveType {
    Index = 1,
    Page = 2,
    Date = 3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateMapping {
    pub id: i64,
    pub template_id: i64,
    pub path_string: String,
    pub is_default: bool,
    pub archive_type: ArchiveType,
    pub modified_at: DateTime<Utc>,
}

macro_rules! text_enum {
    ($ty:ident, $column:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $ty {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DatabaseError::InvalidValue {
                        column: $column,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(PageStatus, "pages.status", {
    Draft => "draft",
    Published => "published",
    Scheduled => "scheduled",
});

text_enum!(TemplateType, "templates.template_type", {
    Page => "page",
    Index => "index",
    Archive => "archive",
    Include => "include",
});

text_enum!(PublishingMode, "templates.publishing_mode", {
    Immediate => "immediate",
    Manual => "manual",
    DoNotPublish => "do_not_publish",
});

impl TryFrom<i64> for ArchiveType {
    type Error = DatabaseError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Index),
            2 => Ok(Self::Page),
            3 => Ok(Self::Date),
            other => Err(DatabaseError::InvalidValue {
                column: "template_mappings.archive_type",
                value: other.to_string(),
            }),
        }
    }
}

/// Read access to content records.
pub trait ContentStore {
    fn blog(&self, id: i64) -> Result<Option<Blog>, DatabaseError>;

    fn blogs(&self) -> Result<Vec<Blog>, DatabaseError>;

    fn page(&self, id: i64) -> Result<Option<Page>, DatabaseError>;

    /// Published pages of a blog, oldest publication first.
    fn published_pages(&self, blog_id: i64) -> Result<Vec<Page>, DatabaseError>;

    /// The published pages immediately before and after `page` in
    /// publication order.
    fn adjacent_pages(&self, page: &Page)
        -> Result<(Option<Page>, Option<Page>), DatabaseError>;

    /// Published pages matching every component of an archive key.
    fn archive_pages(&self, blog_id: i64, key: &ArchiveKey) -> Result<Vec<Page>, DatabaseError>;

    fn template(&self, id: i64) -> Result<Option<Template>, DatabaseError>;

    fn templates(
        &self,
        blog_id: i64,
        template_type: TemplateType,
    ) -> Result<Vec<Template>, DatabaseError>;

    fn mapping(&self, id: i64) -> Result<Option<TemplateMapping>, DatabaseError>;

    fn mappings(&self, template_id: i64) -> Result<Vec<TemplateMapping>, DatabaseError>;

    fn category(&self, id: i64) -> Result<Option<Category>, DatabaseError>;

    fn author(&self, id: i64) -> Result<Option<Author>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enums_round_trip_through_columns() {
        for mode in [
            PublishingMode::Immediate,
            PublishingMode::Manual,
            PublishingMode::DoNotPublish,
        ] {
            assert_eq!(mode.as_str().parse::<PublishingMode>().unwrap(), mode);
        }
        assert_eq!("index".parse::<TemplateType>().unwrap(), TemplateType::Index);
    }

    #[test]
    fn test_unknown_text_is_rejected() {
        let err = "archived".parse::<PageStatus>().unwrap_err();
        assert!(err.to_string().contains("pages.status"));
    }

    #[test]
    fn test_archive_type_codes() {
        assert_eq!(ArchiveType::try_from(3).unwrap(), ArchiveType::Date);
        assert!(ArchiveType::try_from(4).is_err());
    }
}
