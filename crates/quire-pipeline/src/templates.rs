//! Template engine for rendering content pages.

use std::path::Path;

use minijinja::{path_loader, Environment, Value};
use serde::Serialize;

/// Name of the template used when a page does not pick one.
pub const DEFAULT_TEMPLATE: &str = "default.html";

/// A link to a rendered page, for navigation.
#[derive(Debug, Clone, Serialize)]
pub struct PageLink {
    /// Display title
    pub title: String,
    /// URL path
    pub url: String,
}

/// Context for rendering a page template.
#[derive(Debug, Clone, Serialize)]
pub struct Context {
    /// The page itself: frontmatter keys plus `content` and `url`
    pub page: Value,
    /// Everything loaded from the data directory
    pub data: Value,
    /// Every rendered page, in navigation order
    pub pages: Vec<PageLink>,
    /// Base URL
    pub base_url: String,
}

/// Template engine using minijinja.
///
/// Templates are loaded lazily from disk, so a new engine sees template
/// edits made since the last build.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create an engine loading templates from `dir`.
    ///
    /// [`DEFAULT_TEMPLATE`] falls back to a built-in layout when the
    /// directory does not provide one.
    pub fn new(dir: &Path) -> Self {
        let mut env = Environment::new();
        let disk = path_loader(dir);

        env.set_loader(move |name| match disk(name)? {
            Some(source) => Ok(Some(source)),
            None if name == DEFAULT_TEMPLATE => Ok(Some(BUILTIN_TEMPLATE.to_string())),
            None => Ok(None),
        });

        Self { env }
    }

    /// Render a page using the specified template.
    pub fn render_page(&self, template: &str, context: &Context) -> Result<String, minijinja::Error> {
        let tmpl = self.env.get_template(template)?;
        tmpl.render(context)
    }
}

const BUILTIN_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{{ page.title }}</title>
  <link rel="stylesheet" href="{{ base_url }}css/docs.min.css">
</head>
<body>
  <nav>
    <ul>
    {% for link in pages %}
      <li><a href="{{ link.url }}">{{ link.title }}</a></li>
    {% endfor %}
    </ul>
  </nav>
  <main>
    {{ page.content | safe }}
  </main>
</body>
</html>"##;
