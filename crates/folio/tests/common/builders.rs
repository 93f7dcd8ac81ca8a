//! Builders for test content and config documents.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use folio::content::{ArchiveType, PageStatus, PublishingMode, TemplateType};
use folio::db::content_repo::{NewMapping, NewPage, NewTemplate};

pub fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

/// Builder for `NewPage` records.
pub struct PageBuilder {
    page: NewPage,
}

impl PageBuilder {
    /// A published page dated 2021-06-15.
    pub fn new(blog_id: i64, basename: &str) -> Self {
        Self {
            page: NewPage::published(blog_id, basename, date(2021, 6, 15)),
        }
    }

    pub fn published_on(mut self, year: i32, month: u32, day: u32) -> Self {
        self.page.status = PageStatus::Published;
        self.page.publication_date = Some(date(year, month, day));
        self
    }

    pub fn draft(mut self) -> Self {
        self.page.status = PageStatus::Draft;
        self.page.publication_date = None;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.page.title = title.to_string();
        self
    }

    pub fn category(mut self, category_id: i64) -> Self {
        self.page.primary_category_id = Some(category_id);
        self
    }

    pub fn author(mut self, author_id: i64) -> Self {
        self.page.author_id = Some(author_id);
        self
    }

    pub fn build(self) -> NewPage {
        self.page
    }
}

/// Builder for a template together with its mappings.
pub struct TemplateBuilder {
    template: NewTemplate,
    mappings: Vec<(String, ArchiveType)>,
}

impl TemplateBuilder {
    pub fn new(blog_id: i64, template_type: TemplateType, title: &str) -> Self {
        Self {
            template: NewTemplate {
                blog_id,
                title: title.to_string(),
                template_type,
                body: title.to_string(),
                publishing_mode: PublishingMode::Immediate,
            },
            mappings: Vec::new(),
        }
    }

    pub fn body(mut self, body: &str) -> Self {
        self.template.body = body.to_string();
        self
    }

    pub fn mode(mut self, mode: PublishingMode) -> Self {
        self.template.publishing_mode = mode;
        self
    }

    /// Adds a mapping; the archive type follows the template type.
    pub fn mapping(mut self, pattern: &str) -> Self {
        let archive_type = match self.template.template_type {
            TemplateType::Page => ArchiveType::Page,
            TemplateType::Archive => ArchiveType::Date,
            TemplateType::Index | TemplateType::Include => ArchiveType::Index,
        };
        self.mappings.push((pattern.to_string(), archive_type));
        self
    }

    pub fn template(&self) -> &NewTemplate {
        &self.template
    }

    /// Mappings for the inserted template; the first is the default.
    pub fn mappings(&self, template_id: i64) -> Vec<NewMapping> {
        self.mappings
            .iter()
            .enumerate()
            .map(|(i, (pattern, archive_type))| NewMapping {
                template_id,
                path_string: pattern.clone(),
                is_default: i == 0,
                archive_type: *archive_type,
            })
            .collect()
    }
}

/// Builder for JSON config documents.
pub struct ConfigBuilder {
    value: serde_json::Value,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            value: serde_json::json!({ "version": "1.0" }),
        }
    }

    pub fn database(mut self, path: &str) -> Self {
        self.value["database"] = serde_json::json!({ "path": path });
        self
    }

    pub fn output_root(mut self, root: &str) -> Self {
        self.value["output"]["root"] = serde_json::json!(root);
        self
    }

    pub fn batch_size(mut self, batch_size: u64) -> Self {
        self.value["queue"]["batch_size"] = serde_json::json!(batch_size);
        self
    }

    pub fn priority(mut self, job_type: &str, priority: i64) -> Self {
        self.value["priorities"][job_type] = serde_json::json!(priority);
        self
    }

    pub fn set(mut self, key: &str, value: serde_json::Value) -> Self {
        self.value[key] = value;
        self
    }

    pub fn build(self) -> String {
        self.value.to_string()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
