//! Content rendering: markdown pages through templates, plus media copies.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use minijinja::Value;
use rayon::prelude::*;
use serde_json::{Map, Value as JsonValue};
use walkdir::WalkDir;

use crate::frontmatter::{extract_frontmatter, Frontmatter};
use crate::templates::{Context, PageLink, TemplateEngine, DEFAULT_TEMPLATE};

/// Configuration for rendering content.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Markdown pages and media
    pub content_dir: PathBuf,

    /// Templates looked up by name
    pub templates_dir: PathBuf,

    /// YAML and JSON files exposed to templates as `data`
    pub data_dir: PathBuf,

    /// Output directory
    pub output_dir: PathBuf,

    /// Base URL for the site
    pub base_url: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("src/docs/content"),
            templates_dir: PathBuf::from("src/docs/templates"),
            data_dir: PathBuf::from("src/docs/data"),
            output_dir: PathBuf::from("docs"),
            base_url: "/".to_string(),
        }
    }
}

/// Result of a content build.
#[derive(Debug)]
pub struct ContentReport {
    /// Number of pages rendered
    pub pages: usize,

    /// Number of non-markdown files copied
    pub files: usize,

    /// Total build time in milliseconds
    pub duration_ms: u64,

    /// Output directory
    pub output_dir: PathBuf,
}

/// Errors that can occur during a content build.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Failed to read content: {0}")]
    ReadError(String),

    #[error("Failed to parse frontmatter: {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to load data file {path}: {message}")]
    DataError { path: String, message: String },

    #[error("Invalid slug '{slug}' in {path}: must stay inside the output directory")]
    InvalidSlug { path: String, slug: String },

    #[error("Failed to render template for {path}: {message}")]
    TemplateError { path: String, message: String },

    #[error("Failed to write output: {0}")]
    WriteError(String),

    #[error("Content build panicked: {0}")]
    Join(String),
}

/// A page to be rendered.
#[derive(Debug)]
struct PageInfo {
    /// Relative path from the content dir
    relative_path: PathBuf,

    /// Output path
    output_path: PathBuf,

    /// Parsed frontmatter (defaulted when absent)
    frontmatter: Frontmatter,

    /// Markdown body
    body: String,
}

/// Renders a content tree into the output directory.
#[derive(Debug, Clone)]
pub struct ContentBuilder {
    config: ContentConfig,
}

impl ContentBuilder {
    /// Create a new content builder.
    pub fn new(config: ContentConfig) -> Self {
        Self { config }
    }

    /// Build all content.
    ///
    /// Rendering runs on the blocking pool; the returned future completes
    /// once every page and media file is written.
    pub async fn build_content(&self) -> Result<ContentReport, ContentError> {
        let builder = self.clone();
        tokio::task::spawn_blocking(move || builder.build_blocking())
            .await
            .map_err(|e| ContentError::Join(e.to_string()))?
    }

    /// Build all content on the current thread.
    pub fn build_blocking(&self) -> Result<ContentReport, ContentError> {
        let start = Instant::now();

        fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| ContentError::WriteError(e.to_string()))?;

        let data = self.load_data()?;
        let (pages, media) = self.discover()?;
        let links = self.build_links(&pages);

        // Templates are reloaded on every build so edits are picked up.
        let templates = TemplateEngine::new(&self.config.templates_dir);
        let data = Value::from_serialize(&data);

        pages
            .par_iter()
            .map(|page| self.render_page(page, &templates, &data, &links))
            .collect::<Result<Vec<()>, ContentError>>()?;

        for file in &media {
            self.copy_media(file)?;
        }

        Ok(ContentReport {
            pages: pages.len(),
            files: media.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            output_dir: self.config.output_dir.clone(),
        })
    }

    /// Discover pages and media files in the content directory.
    fn discover(&self) -> Result<(Vec<PageInfo>, Vec<PathBuf>), ContentError> {
        let root = &self.config.content_dir;
        if !root.exists() {
            return Err(ContentError::ReadError(format!(
                "Content directory not found: {}",
                root.display()
            )));
        }

        let mut pages = Vec::new();
        let mut media = Vec::new();

        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();

            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "md" && ext != "markdown" {
                media.push(relative_path);
                continue;
            }

            let source = fs::read_to_string(path)
                .map_err(|e| ContentError::ReadError(format!("{}: {}", path.display(), e)))?;

            let (frontmatter, body) =
                extract_frontmatter(&source).map_err(|e| ContentError::ParseError {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            let frontmatter = frontmatter.unwrap_or_default();

            if frontmatter.draft {
                tracing::debug!("Skipping draft {}", path.display());
                continue;
            }

            let output_path = self
                .calculate_output_path(&relative_path, &frontmatter)
                .ok_or_else(|| ContentError::InvalidSlug {
                    path: path.display().to_string(),
                    slug: frontmatter.slug.clone().unwrap_or_default(),
                })?;

            pages.push(PageInfo {
                body: body.to_string(),
                relative_path,
                output_path,
                frontmatter,
            });
        }

        // Sort by order from frontmatter, then by path
        pages.sort_by(|a, b| {
            let order_a = a.frontmatter.order.unwrap_or(999);
            let order_b = b.frontmatter.order.unwrap_or(999);
            order_a
                .cmp(&order_b)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        media.sort();

        Ok((pages, media))
    }

    /// Load every YAML/JSON file below the data directory.
    ///
    /// `data/nav/main.yml` becomes `data.nav.main`.
    fn load_data(&self) -> Result<JsonValue, ContentError> {
        let mut root = Map::new();
        let dir = &self.config.data_dir;
        if !dir.exists() {
            return Ok(JsonValue::Object(root));
        }

        for entry in WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !path.is_file() || !matches!(ext, "yml" | "yaml" | "json") {
                continue;
            }

            let data_error = |message: String| ContentError::DataError {
                path: path.display().to_string(),
                message,
            };

            let source = fs::read_to_string(path).map_err(|e| data_error(e.to_string()))?;
            let value: JsonValue = if ext == "json" {
                serde_json::from_str(&source).map_err(|e| data_error(e.to_string()))?
            } else {
                serde_yaml::from_str(&source).map_err(|e| data_error(e.to_string()))?
            };

            let relative = path.strip_prefix(dir).unwrap_or(path).with_extension("");
            let keys: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            insert_nested(&mut root, &keys, value);
        }

        Ok(JsonValue::Object(root))
    }

    /// Calculate output path for a page.
    ///
    /// Returns `None` for a slug that would leave the output directory.
    fn calculate_output_path(
        &self,
        relative: &Path,
        frontmatter: &Frontmatter,
    ) -> Option<PathBuf> {
        if let Some(slug) = &frontmatter.slug {
            let slug = Path::new(slug.trim_matches('/'));
            if !slug.components().all(|c| matches!(c, Component::Normal(_))) {
                return None;
            }
            return Some(self.config.output_dir.join(slug).join("index.html"));
        }

        let stem = relative
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("index");
        let parent = relative.parent().unwrap_or(Path::new(""));

        if stem == "index" {
            // content/index.md -> docs/index.html
            Some(self.config.output_dir.join(parent).join("index.html"))
        } else {
            // content/install.md -> docs/install/index.html
            Some(
                self.config
                    .output_dir
                    .join(parent)
                    .join(stem)
                    .join("index.html"),
            )
        }
    }

    /// Convert output path to URL.
    fn path_to_url(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.config.output_dir).unwrap_or(path);

        let url = relative
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        if url.is_empty() {
            self.config.base_url.clone()
        } else {
            format!("{}{}/", self.config.base_url, url)
        }
    }

    fn page_title(page: &PageInfo) -> String {
        page.frontmatter.title.clone().unwrap_or_else(|| {
            page.relative_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Untitled")
                .to_string()
        })
    }

    fn build_links(&self, pages: &[PageInfo]) -> Vec<PageLink> {
        pages
            .iter()
            .map(|page| PageLink {
                title: Self::page_title(page),
                url: self.path_to_url(&page.output_path),
            })
            .collect()
    }

    /// Render a single page.
    fn render_page(
        &self,
        page: &PageInfo,
        templates: &TemplateEngine,
        data: &Value,
        links: &[PageLink],
    ) -> Result<(), ContentError> {
        let source = page.relative_path.display().to_string();

        let mut fields = match serde_json::to_value(&page.frontmatter) {
            Ok(JsonValue::Object(map)) => map,
            _ => Map::new(),
        };
        fields.insert("title".into(), Self::page_title(page).into());
        fields.insert("content".into(), render_markdown(&page.body).into());
        fields.insert("url".into(), self.path_to_url(&page.output_path).into());
        fields.insert("source".into(), source.clone().into());

        let context = Context {
            page: Value::from_serialize(&fields),
            data: data.clone(),
            pages: links.to_vec(),
            base_url: self.config.base_url.clone(),
        };

        let template = page
            .frontmatter
            .template
            .as_deref()
            .unwrap_or(DEFAULT_TEMPLATE);

        let html = templates
            .render_page(template, &context)
            .map_err(|e| ContentError::TemplateError {
                path: source,
                message: e.to_string(),
            })?;

        if let Some(parent) = page.output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ContentError::WriteError(e.to_string()))?;
        }

        fs::write(&page.output_path, html).map_err(|e| ContentError::WriteError(e.to_string()))
    }

    /// Copy a non-markdown content file to the same relative location.
    fn copy_media(&self, relative: &Path) -> Result<(), ContentError> {
        let src = self.config.content_dir.join(relative);
        let dest = self.config.output_dir.join(relative);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ContentError::WriteError(e.to_string()))?;
        }
        fs::copy(&src, &dest)
            .map_err(|e| ContentError::WriteError(format!("{}: {}", dest.display(), e)))?;

        Ok(())
    }
}

fn insert_nested(map: &mut Map<String, JsonValue>, keys: &[String], value: JsonValue) {
    match keys {
        [] => {}
        [leaf] => {
            map.insert(leaf.clone(), value);
        }
        [head, rest @ ..] => {
            let child = map
                .entry(head.clone())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !child.is_object() {
                *child = JsonValue::Object(Map::new());
            }
            if let Some(inner) = child.as_object_mut() {
                insert_nested(inner, rest, value);
            }
        }
    }
}

/// Render markdown to HTML.
pub fn render_markdown(content: &str) -> String {
    use pulldown_cmark::{html, Options, Parser};

    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_HEADING_ATTRIBUTES;

    let parser = Parser::new_ext(content, options);

    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);

    html_output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    fn site() -> (TempDir, ContentConfig) {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src/docs");
        fs::create_dir_all(src.join("content/guide")).unwrap();
        fs::create_dir_all(src.join("templates")).unwrap();
        fs::create_dir_all(src.join("data/nav")).unwrap();

        let config = ContentConfig {
            content_dir: src.join("content"),
            templates_dir: src.join("templates"),
            data_dir: src.join("data"),
            output_dir: temp.path().join("docs"),
            base_url: "/".to_string(),
        };
        (temp, config)
    }

    #[test]
    fn renders_markdown() {
        let html = render_markdown("# Hello\n\nWorld");

        assert!(html.contains("<h1>Hello</h1>"));
        assert!(html.contains("<p>World</p>"));
    }

    #[tokio::test]
    async fn builds_pages_with_default_template() {
        let (_temp, config) = site();
        fs::write(
            config.content_dir.join("index.md"),
            "---\ntitle: Home\n---\n# Welcome\n",
        )
        .unwrap();
        fs::write(
            config.content_dir.join("guide/install.md"),
            "---\ntitle: Install\norder: 1\n---\nRun it.\n",
        )
        .unwrap();

        let report = ContentBuilder::new(config.clone())
            .build_content()
            .await
            .unwrap();

        assert_eq!(report.pages, 2);
        let index = fs::read_to_string(config.output_dir.join("index.html")).unwrap();
        assert!(index.contains("<h1>Welcome</h1>"));
        assert!(config
            .output_dir
            .join("guide/install/index.html")
            .exists());
    }

    #[tokio::test]
    async fn exposes_data_and_frontmatter_to_templates() {
        let (_temp, config) = site();
        fs::write(
            config.templates_dir.join("default.html"),
            "{{ page.title }}|{{ page.section }}|{{ data.site.name }}|{{ data.nav.main[0] }}|{{ page.url }}",
        )
        .unwrap();
        fs::write(config.data_dir.join("site.yml"), "name: Quire\n").unwrap();
        fs::write(config.data_dir.join("nav/main.json"), r#"["intro"]"#).unwrap();
        fs::write(
            config.content_dir.join("intro.md"),
            "---\ntitle: Intro\nsection: basics\n---\nText\n",
        )
        .unwrap();

        ContentBuilder::new(config.clone())
            .build_content()
            .await
            .unwrap();

        let html = fs::read_to_string(config.output_dir.join("intro/index.html")).unwrap();
        // `/` is escaped by the html auto-escaper.
        assert_eq!(html, "Intro|basics|Quire|intro|&#x2f;intro&#x2f;");
    }

    #[test]
    fn honours_slug_template_and_drafts() {
        let (_temp, config) = site();
        fs::write(config.templates_dir.join("bare.html"), "{{ page.content | safe }}").unwrap();
        fs::write(
            config.content_dir.join("long-name.md"),
            "---\nslug: short\ntemplate: bare.html\n---\nBody\n",
        )
        .unwrap();
        fs::write(
            config.content_dir.join("wip.md"),
            "---\ndraft: true\n---\nNot yet\n",
        )
        .unwrap();

        let report = ContentBuilder::new(config.clone())
            .build_blocking()
            .unwrap();

        assert_eq!(report.pages, 1);
        assert_eq!(
            fs::read_to_string(config.output_dir.join("short/index.html")).unwrap(),
            "<p>Body</p>\n"
        );
        assert!(!config.output_dir.join("wip").exists());
    }

    #[tokio::test]
    async fn copies_media_files() {
        let (_temp, config) = site();
        fs::write(config.content_dir.join("index.md"), "# Home").unwrap();
        fs::write(config.content_dir.join("guide/diagram.svg"), "<svg/>").unwrap();

        let report = ContentBuilder::new(config.clone())
            .build_content()
            .await
            .unwrap();

        assert_eq!(report.files, 1);
        assert_eq!(
            fs::read_to_string(config.output_dir.join("guide/diagram.svg")).unwrap(),
            "<svg/>"
        );
    }

    #[test]
    fn slug_cannot_leave_output_directory() {
        let (temp, config) = site();
        fs::write(
            config.content_dir.join("escape.md"),
            "---\nslug: ../../outside\n---\nBody\n",
        )
        .unwrap();

        let err = ContentBuilder::new(config).build_blocking().unwrap_err();

        assert!(matches!(
            err,
            ContentError::InvalidSlug { ref slug, .. } if slug == "../../outside"
        ));
        assert!(!temp.path().join("outside").exists());
        assert!(!temp.path().parent().unwrap().join("outside").exists());
    }

    #[test]
    fn missing_template_fails_the_build() {
        let (_temp, config) = site();
        fs::write(
            config.content_dir.join("index.md"),
            "---\ntemplate: missing.html\n---\n# Home",
        )
        .unwrap();

        let err = ContentBuilder::new(config).build_blocking().unwrap_err();

        assert!(matches!(err, ContentError::TemplateError { .. }));
    }

    #[test]
    fn missing_content_directory_fails() {
        let (_temp, mut config) = site();
        config.content_dir = config.content_dir.join("absent");

        assert!(matches!(
            ContentBuilder::new(config).build_blocking(),
            Err(ContentError::ReadError(_))
        ));
    }
}
