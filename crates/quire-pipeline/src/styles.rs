//! Stylesheet compilation: collect, preprocess, prefix, and minify.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use globset::{Glob, GlobSet, GlobSetBuilder};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// External command run on every source instead of the built-in SCSS
/// compiler, e.g. `sass`. It receives the source path as last argument and
/// must print CSS on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preprocessor {
    /// Program name or path
    pub command: String,

    /// Extra arguments placed before the source path
    #[serde(default)]
    pub args: Vec<String>,

    /// Passed as `--load-path=<path>` arguments
    #[serde(default)]
    pub include_paths: Vec<String>,
}

/// Configuration for compiling one stylesheet.
#[derive(Debug, Clone)]
pub struct StyleConfig {
    /// Directory the patterns are relative to
    pub src_dir: PathBuf,

    /// Glob patterns selecting sources, e.g. `css/**/*.scss`
    pub patterns: Vec<String>,

    /// Directory receiving `<name>.css` and `<name>.min.css`
    pub output_dir: PathBuf,

    /// Output file stem
    pub name: String,

    /// Browserslist queries used for vendor prefixes
    pub targets: Vec<String>,

    /// Directories searched by `@use` and `@import` in `.scss` sources
    pub load_paths: Vec<PathBuf>,

    /// Optional preprocessor
    pub preprocessor: Option<Preprocessor>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            src_dir: PathBuf::from("src/docs"),
            patterns: vec!["css/**/*.scss".to_string()],
            output_dir: PathBuf::from("docs/css"),
            name: "docs".to_string(),
            targets: vec!["defaults".to_string()],
            load_paths: Vec::new(),
            preprocessor: None,
        }
    }
}

/// Files written by a compilation.
#[derive(Debug, Clone)]
pub struct StyleOutput {
    /// Expanded stylesheet
    pub css: PathBuf,

    /// Minified stylesheet
    pub min_css: PathBuf,

    /// Number of source files concatenated
    pub sources: usize,
}

/// Errors that can occur while compiling styles.
#[derive(Debug, thiserror::Error)]
pub enum StyleError {
    #[error("Invalid style pattern: {0}")]
    Pattern(String),

    #[error("Invalid browser targets: {0}")]
    Targets(String),

    #[error("Failed to read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error("Preprocessor '{0}' not found on PATH")]
    PreprocessorMissing(String),

    #[error("Preprocessor failed on {}: {message}", path.display())]
    Preprocessor { path: PathBuf, message: String },

    #[error("SCSS error in {}: {message}", path.display())]
    Scss { path: PathBuf, message: String },

    #[error("CSS parse error: {0}")]
    Parse(String),

    #[error("CSS minify error: {0}")]
    Minify(String),

    #[error("CSS print error: {0}")]
    Print(String),

    #[error("Failed to write output: {0}")]
    Write(String),
}

/// Compiles sources matching a glob set into a single prefixed stylesheet.
#[derive(Debug, Clone)]
pub struct StyleCompiler {
    config: StyleConfig,
}

impl StyleCompiler {
    /// Create a compiler for the given configuration.
    pub fn new(config: StyleConfig) -> Self {
        Self { config }
    }

    /// Compile and write `<name>.css` and `<name>.min.css`.
    pub async fn compile(&self) -> Result<StyleOutput, StyleError> {
        let sources = self.collect_sources()?;
        if sources.is_empty() {
            tracing::warn!(
                "No stylesheets matched {:?} in {}",
                self.config.patterns,
                self.config.src_dir.display()
            );
        }

        let mut combined = String::new();
        for source in &sources {
            let css = match &self.config.preprocessor {
                Some(pre) => run_preprocessor(pre, source).await?,
                None if is_scss(source) => compile_scss(source, &self.config.load_paths)?,
                None => fs::read_to_string(source).map_err(|e| StyleError::Read {
                    path: source.clone(),
                    message: e.to_string(),
                })?,
            };
            combined.push_str(&css);
            if !combined.ends_with('\n') {
                combined.push('\n');
            }
        }

        let filename = format!("{}.css", self.config.name);
        let (expanded, minified) = transform(&combined, &filename, &self.config.targets)?;

        fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| StyleError::Write(e.to_string()))?;

        let css = self.config.output_dir.join(&filename);
        let min_css = self
            .config
            .output_dir
            .join(format!("{}.min.css", self.config.name));

        fs::write(&css, expanded).map_err(|e| StyleError::Write(e.to_string()))?;
        fs::write(&min_css, minified).map_err(|e| StyleError::Write(e.to_string()))?;

        tracing::debug!("Wrote {} and {}", css.display(), min_css.display());

        Ok(StyleOutput {
            css,
            min_css,
            sources: sources.len(),
        })
    }

    /// Source files in a stable order, partials (`_name.scss`) excluded.
    fn collect_sources(&self) -> Result<Vec<PathBuf>, StyleError> {
        let globs = build_globset(&self.config.patterns)?;
        let root = &self.config.src_dir;

        let mut sources: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('_'))
            .filter(|e| {
                relative_str(root, e.path())
                    .map(|rel| globs.is_match(rel))
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();

        sources.sort();
        Ok(sources)
    }
}

/// Parse, prefix for `targets`, and print expanded and minified CSS.
pub fn transform(
    css: &str,
    filename: &str,
    targets: &[String],
) -> Result<(String, String), StyleError> {
    let browsers = if targets.is_empty() {
        None
    } else {
        Browsers::from_browserslist(targets.iter())
            .map_err(|e| StyleError::Targets(e.to_string()))?
    };
    let targets = Targets {
        browsers,
        ..Targets::default()
    };

    let mut stylesheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| StyleError::Parse(e.to_string()))?;

    stylesheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| StyleError::Minify(e.to_string()))?;

    let expanded = stylesheet
        .to_css(PrinterOptions {
            minify: false,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| StyleError::Print(e.to_string()))?;

    let minified = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| StyleError::Print(e.to_string()))?;

    Ok((expanded.code, minified.code))
}

fn is_scss(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "scss")
}

fn compile_scss(source: &Path, load_paths: &[PathBuf]) -> Result<String, StyleError> {
    let options = grass::Options::default().load_paths(load_paths);
    grass::from_path(source, &options).map_err(|e| StyleError::Scss {
        path: source.to_path_buf(),
        message: e.to_string(),
    })
}

async fn run_preprocessor(pre: &Preprocessor, source: &Path) -> Result<String, StyleError> {
    let program = which::which(&pre.command)
        .map_err(|_| StyleError::PreprocessorMissing(pre.command.clone()))?;

    let output = tokio::process::Command::new(program)
        .args(&pre.args)
        .args(pre.include_paths.iter().map(|p| format!("--load-path={p}")))
        .arg(source)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| StyleError::Preprocessor {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(StyleError::Preprocessor {
            path: source.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| StyleError::Preprocessor {
        path: source.to_path_buf(),
        message: e.to_string(),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, StyleError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| StyleError::Pattern(e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| StyleError::Pattern(e.to_string()))
}

/// Path relative to `root` with forward slashes.
fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}
