//! The seam to the external templating engine.

use serde::Serialize;
use thiserror::Error;

use crate::content::{Blog, Page, Template};
use crate::path::ArchiveContext;

#[derive(Error, Debug)]
#[error("{0}")]
pub struct RenderError(pub String);

/// Everything a template may reference while rendering one output.
#[derive(Debug, Clone, Serialize)]
pub struct RenderContext<'a> {
    pub blog: &'a Blog,
    pub template: &'a Template,
    /// The page being published, for page templates.
    pub page: Option<&'a Page>,
    /// Pages listed by the output: the page itself, every published page for
    /// indexes, or the archive's matching pages.
    pub pages: &'a [Page],
    pub previous: Option<&'a Page>,
    pub next: Option<&'a Page>,
    pub archive: Option<&'a ArchiveContext>,
    pub file_path: &'a str,
    pub url: &'a str,
}

pub trait Renderer: Send + Sync {
    fn render(&self, template_body: &str, context: &RenderContext<'_>)
        -> Result<Vec<u8>, RenderError>;
}

impl<F> Renderer for F
where
    F: Fn(&str, &RenderContext<'_>) -> Result<Vec<u8>, RenderError> + Send + Sync,
{
    fn render(
        &self,
        template_body: &str,
        context: &RenderContext<'_>,
    ) -> Result<Vec<u8>, RenderError> {
        self(template_body, context)
    }
}

/// Writes the template body unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerbatimRenderer;

impl Renderer for VerbatimRenderer {
    fn render(
        &self,
        template_body: &str,
        _context: &RenderContext<'_>,
    ) -> Result<Vec<u8>, RenderError> {
        Ok(template_body.as_bytes().to_vec())
    }
}
