//! Project configuration (`quire.toml`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

use quire_pipeline::{
    ContentConfig, DeployConfig, GitIdentity, Preprocessor, StyleConfig, VendorPackage,
};
use quire_server::{select_browser, PreviewConfig, ProxyRule, ReloadConfig};

/// Which output tree to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Prod,
    Dev,
}

/// Configuration file structure.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    pub pages: PagesConfig,
    pub css: CssConfig,
    pub vendor: Vec<VendorPackage>,
    pub server: ServerSettings,
    pub deploy: DeploySettings,
}

impl Default for QuireConfig {
    fn default() -> Self {
        Self {
            pages: PagesConfig::default(),
            css: CssConfig::default(),
            vendor: vec![
                VendorPackage {
                    package: "bootstrap".to_string(),
                    source: "dist".to_string(),
                    dest: "vendor/bootstrap/dist".to_string(),
                },
                VendorPackage {
                    package: "prism-themes".to_string(),
                    source: "themes".to_string(),
                    dest: "vendor/prism-themes/themes".to_string(),
                },
            ],
            server: ServerSettings::default(),
            deploy: DeploySettings::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PagesConfig {
    /// Source tree holding `css/`, `content/`, `data/`, and `templates/`
    pub src: String,
    pub dist: DistConfig,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            src: "src/docs".to_string(),
            dist: DistConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DistConfig {
    pub prod: DistTarget,
    pub dev: DistTarget,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self {
            prod: DistTarget {
                path: "docs".to_string(),
                url: "/".to_string(),
            },
            dev: DistTarget {
                path: "temp/docs".to_string(),
                url: "/".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistTarget {
    pub path: String,
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    "/".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CssConfig {
    /// Globs relative to `pages.src`
    pub patterns: Vec<String>,
    /// Directory below the output tree
    pub output: String,
    pub name: String,
    pub targets: Vec<String>,
    pub include_paths: Vec<String>,
    pub preprocessor: Option<String>,
    pub preprocessor_args: Vec<String>,
}

impl Default for CssConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["css/**/*.scss".to_string()],
            output: "css".to_string(),
            name: "docs".to_string(),
            targets: vec!["defaults".to_string()],
            include_paths: vec!["src/docs/css".to_string()],
            preprocessor: None,
            preprocessor_args: Vec::new(),
        }
    }
}

/// Preview server settings.
///
/// `open`, `fallback` and proxy targets may contain `{dist}`, which expands to
/// the output path of the environment being served.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub https: bool,
    pub root: String,
    pub open: Option<String>,
    pub fallback: Option<String>,
    pub reload_port: u16,
    /// Add the reload client to served pages
    pub inject_reload: bool,
    pub proxies: Vec<ProxyRule>,
    /// Browser per OS name, plus `default`
    pub browsers: BTreeMap<String, String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            https: false,
            root: ".".to_string(),
            open: Some("/{dist}/".to_string()),
            fallback: Some("{dist}/index.html".to_string()),
            reload_port: 35729,
            inject_reload: true,
            proxies: vec![
                ProxyRule {
                    source: "/css/".to_string(),
                    target: "/{dist}/css/".to_string(),
                },
                ProxyRule {
                    source: "/vendor/".to_string(),
                    target: "/{dist}/vendor/".to_string(),
                },
            ],
            browsers: [
                ("default", "firefox"),
                ("macos", "google chrome"),
                ("linux", "google-chrome"),
                ("windows", "chrome"),
            ]
            .into_iter()
            .map(|(os, browser)| (os.to_string(), browser.to_string()))
            .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    pub remote: String,
    pub branch: String,
    pub message: String,
    pub cache_dir: String,
    pub force: bool,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch: "gh-pages".to_string(),
            message: "Update docs".to_string(),
            cache_dir: ".publish".to_string(),
            force: false,
            name: None,
            email: None,
        }
    }
}

impl QuireConfig {
    /// Load configuration from `path`, or defaults when it does not exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Output target for an environment.
    pub fn dist(&self, env: Environment) -> &DistTarget {
        match env {
            Environment::Prod => &self.pages.dist.prod,
            Environment::Dev => &self.pages.dist.dev,
        }
    }

    /// Directory watched for changes; watch patterns are relative to it.
    pub fn watch_root(&self, root: &Path) -> PathBuf {
        root.join(&self.pages.src)
    }

    /// Replace `{dist}` with the environment's output path.
    fn expand(&self, value: &str, env: Environment) -> String {
        value.replace("{dist}", self.dist(env).path.trim_matches('/'))
    }

    pub fn style_config(&self, root: &Path, env: Environment) -> StyleConfig {
        let preprocessor = self.css.preprocessor.as_ref().map(|command| Preprocessor {
            command: command.clone(),
            args: self.css.preprocessor_args.clone(),
            include_paths: self
                .css
                .include_paths
                .iter()
                .map(|p| root.join(p).display().to_string())
                .collect(),
        });

        StyleConfig {
            src_dir: root.join(&self.pages.src),
            patterns: self.css.patterns.clone(),
            output_dir: root.join(&self.dist(env).path).join(&self.css.output),
            name: self.css.name.clone(),
            targets: self.css.targets.clone(),
            load_paths: self.css.include_paths.iter().map(|p| root.join(p)).collect(),
            preprocessor,
        }
    }

    pub fn content_config(&self, root: &Path, env: Environment) -> ContentConfig {
        let src = root.join(&self.pages.src);
        let dist = self.dist(env);

        ContentConfig {
            content_dir: src.join("content"),
            templates_dir: src.join("templates"),
            data_dir: src.join("data"),
            output_dir: root.join(&dist.path),
            base_url: dist.url.clone(),
        }
    }

    /// Preview server settings for the output tree of `env`.
    pub fn preview_config(&self, root: &Path, env: Environment) -> PreviewConfig {
        let server = &self.server;
        PreviewConfig {
            host: server.host.clone(),
            port: server.port,
            https: server.https,
            root: root.join(&server.root),
            open: server.open.as_deref().map(|open| self.expand(open, env)),
            fallback: server.fallback.as_deref().map(|f| self.expand(f, env)),
            proxies: server
                .proxies
                .iter()
                .map(|rule| ProxyRule {
                    source: rule.source.clone(),
                    target: self.expand(&rule.target, env),
                })
                .collect(),
            reload_script: server
                .inject_reload
                .then(|| self.reload_config(false, env).script_url()),
        }
    }

    /// Reload server settings; `open` decides whether a browser is launched.
    pub fn reload_config(&self, open: bool, env: Environment) -> ReloadConfig {
        let server = &self.server;
        let open_url = open.then(|| {
            PreviewConfig {
                host: server.host.clone(),
                port: server.port,
                https: server.https,
                open: server.open.as_deref().map(|o| self.expand(o, env)),
                ..PreviewConfig::default()
            }
            .url()
        });

        ReloadConfig {
            host: server.host.clone(),
            port: server.reload_port,
            open_url,
            browser: select_browser(&server.browsers, std::env::consts::OS).map(str::to_string),
        }
    }

    /// Publishing always uses the production output.
    pub fn deploy_config(&self, root: &Path) -> DeployConfig {
        let deploy = &self.deploy;
        let identity = match (&deploy.name, &deploy.email) {
            (Some(name), Some(email)) => Some(GitIdentity {
                name: name.clone(),
                email: email.clone(),
            }),
            _ => None,
        };

        DeployConfig {
            output_dir: root.join(&self.pages.dist.prod.path),
            project_dir: root.to_path_buf(),
            cache_dir: root.join(&deploy.cache_dir),
            remote: deploy.remote.clone(),
            branch: deploy.branch.clone(),
            message: deploy.message.clone(),
            force: deploy.force,
            identity,
        }
    }
}

/// Directory the configuration file lives in; paths are relative to it.
pub fn project_root(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
