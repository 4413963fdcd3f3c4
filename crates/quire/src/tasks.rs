//! The project's named tasks.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use quire_pipeline::{
    empty_dir, ContentBuilder, GitPublisher, PackageResolver, StyleCompiler, VendorCopier,
};
use quire_server::{
    ArmedOrchestrator, FileWatcher, LiveReload, PreviewServer, Reloader, WatchOrchestrator,
};
use quire_tasks::{Step, TaskContext, TaskError, TaskRegistry};

use crate::config::{Environment, QuireConfig};

/// State shared by the tasks of one process.
pub struct Session {
    pub config: QuireConfig,
    pub root: PathBuf,
    pub env: Environment,
    pub preview: Arc<PreviewServer>,
    pub reload: Arc<LiveReload>,
    watch: Mutex<Option<(ArmedOrchestrator, FileWatcher)>>,
}

impl Session {
    /// Create a session; `open` decides whether the browser is launched.
    pub fn new(config: QuireConfig, root: PathBuf, env: Environment, open: bool) -> Self {
        let preview = Arc::new(PreviewServer::new(config.preview_config(&root, env)));
        let reload = Arc::new(LiveReload::new(config.reload_config(open, env)));

        Self {
            config,
            root,
            env,
            preview,
            reload,
            watch: Mutex::new(None),
        }
    }

    /// Whether a server or watcher keeps the process busy.
    pub fn is_serving(&self) -> bool {
        let watching = self.watch.lock().map(|w| w.is_some()).unwrap_or(false);
        self.preview.local_addr().is_some() || self.reload.is_started() || watching
    }

    fn output_dir(&self) -> PathBuf {
        self.root.join(&self.config.dist(self.env).path)
    }
}

/// Register every project task.
pub fn register(registry: &mut TaskRegistry, session: &Arc<Session>) -> Result<(), TaskError> {
    let s = Arc::clone(session);
    registry.register("build-docs-clean", &[], move |_ctx: TaskContext| {
        let dir = s.output_dir();
        async move {
            tokio::task::spawn_blocking(move || empty_dir(&dir))
                .await?
                .context("Failed to empty output directory")
        }
    })?;

    let s = Arc::clone(session);
    registry.register("build-docs-vendor", &[], move |_ctx: TaskContext| {
        let s = Arc::clone(&s);
        async move {
            let copier = VendorCopier::new(PackageResolver::new(&s.root), s.output_dir());
            let copies = copier.copy_all(&s.config.vendor).await?;
            for copy in &copies {
                tracing::info!("Copied {} ({} files)", copy.package, copy.files);
            }
            Ok::<(), anyhow::Error>(())
        }
    })?;

    let s = Arc::clone(session);
    registry.register("build-docs-css", &[], move |_ctx: TaskContext| {
        let compiler = StyleCompiler::new(s.config.style_config(&s.root, s.env));
        async move {
            let output = compiler.compile().await?;
            tracing::info!(
                "Compiled {} stylesheets into {}",
                output.sources,
                output.css.display()
            );
            Ok::<(), anyhow::Error>(())
        }
    })?;

    let s = Arc::clone(session);
    registry.register("build-docs-html", &[], move |_ctx: TaskContext| {
        let builder = ContentBuilder::new(s.config.content_config(&s.root, s.env));
        async move {
            let report = builder.build_content().await?;
            tracing::info!(
                "Built {} pages and copied {} files in {}ms",
                report.pages,
                report.files,
                report.duration_ms
            );
            Ok::<(), anyhow::Error>(())
        }
    })?;

    registry.register_sequence(
        "build-docs",
        &[],
        [
            Step::from("build-docs-clean"),
            Step::parallel(["build-docs-vendor", "build-docs-css"]),
            Step::from("build-docs-html"),
        ],
    )?;

    let s = Arc::clone(session);
    registry.register("webserver-init", &[], move |_ctx: TaskContext| {
        let preview = Arc::clone(&s.preview);
        async move {
            preview.start().await?;
            Ok::<(), anyhow::Error>(())
        }
    })?;

    let s = Arc::clone(session);
    registry.register("livereload-init", &[], move |_ctx: TaskContext| {
        let reload = Arc::clone(&s.reload);
        async move {
            reload.start().await?;
            Ok::<(), anyhow::Error>(())
        }
    })?;

    let s = Arc::clone(session);
    registry.register("livereload-reload", &[], move |_ctx: TaskContext| {
        s.reload.refresh(&s.preview.url());
        async { Ok::<(), anyhow::Error>(()) }
    })?;

    let s = Arc::clone(session);
    registry.register("watch:livereload", &[], move |ctx: TaskContext| {
        let s = Arc::clone(&s);
        async move { watch(&s, &ctx) }
    })?;

    registry.register_sequence(
        "livereload",
        &[],
        [
            "build-docs",
            "webserver-init",
            "livereload-init",
            "watch:livereload",
        ],
    )?;

    let s = Arc::clone(session);
    registry.register("deploy", &[], move |_ctx: TaskContext| {
        let config = s.config.deploy_config(&s.root);
        async move {
            let report = GitPublisher::new(config)?.publish().await?;
            if report.committed {
                tracing::info!("Published {} files to {}", report.files, report.branch);
            }
            Ok::<(), anyhow::Error>(())
        }
    })?;

    registry.register_alias("default", &["livereload"])?;

    Ok(())
}

/// Arm the CSS and content bindings and start watching the project.
fn watch(session: &Session, ctx: &TaskContext) -> Result<()> {
    let config = &session.config;
    let reloader: Arc<dyn Reloader> = session.reload.clone();

    let mut orchestrator = WatchOrchestrator::new(ctx.runner().clone())
        .with_reloader(reloader, session.preview.url());

    orchestrator.watch(config.css.patterns.clone(), ["build-docs-css"], true)?;
    orchestrator.watch(
        ["content/**/*", "data/**/*", "templates/**/*"],
        ["build-docs-html"],
        true,
    )?;

    let armed = orchestrator.arm();
    let watcher = armed.watch_filesystem(&config.watch_root(&session.root))?;

    let mut slot = session
        .watch
        .lock()
        .map_err(|_| anyhow::anyhow!("watch state poisoned"))?;
    *slot = Some((armed, watcher));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quire_tasks::{Action, TaskRunner};
    use std::fs;
    use tempfile::tempdir;

    fn session(root: PathBuf) -> Arc<Session> {
        session_for(root, Environment::Prod)
    }

    fn session_for(root: PathBuf, env: Environment) -> Arc<Session> {
        let mut config = QuireConfig::default();
        config.vendor.clear();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.server.reload_port = 0;
        Arc::new(Session::new(config, root, env, false))
    }

    fn write_sources(root: &std::path::Path) {
        let src = root.join("src/docs");
        fs::create_dir_all(src.join("css")).unwrap();
        fs::create_dir_all(src.join("content")).unwrap();
        fs::write(src.join("css/docs.scss"), ".a { .b { color: red; } }").unwrap();
        fs::write(src.join("content/index.md"), "---\ntitle: Home\n---\n# Hi").unwrap();
    }

    fn runner(session: &Arc<Session>) -> TaskRunner {
        let mut registry = TaskRegistry::new();
        register(&mut registry, session).unwrap();
        TaskRunner::new(registry.build().unwrap())
    }

    #[test]
    fn registers_every_named_task() {
        let temp = tempdir().unwrap();
        let runner = runner(&session(temp.path().to_path_buf()));

        let names: Vec<&str> = runner.graph().tasks().map(|t| t.name()).collect();
        assert_eq!(
            names,
            [
                "build-docs-clean",
                "build-docs-vendor",
                "build-docs-css",
                "build-docs-html",
                "build-docs",
                "webserver-init",
                "livereload-init",
                "livereload-reload",
                "watch:livereload",
                "livereload",
                "deploy",
                "default",
            ]
        );

        let default = runner.graph().get("default").unwrap();
        assert_eq!(default.prerequisites(), ["livereload"]);
        assert!(matches!(default.action(), Action::None));
    }

    #[tokio::test]
    async fn build_docs_produces_site() {
        let temp = tempdir().unwrap();
        write_sources(temp.path());

        let stale = temp.path().join("docs/stale.html");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "old").unwrap();

        let runner = runner(&session(temp.path().to_path_buf()));
        runner.run("build-docs").await.unwrap();

        assert!(!stale.exists());
        assert!(temp.path().join("docs/css/docs.css").exists());
        assert!(temp.path().join("docs/css/docs.min.css").exists());
        let index = fs::read_to_string(temp.path().join("docs/index.html")).unwrap();
        assert!(index.contains("<h1>Hi</h1>"));
        let css = fs::read_to_string(temp.path().join("docs/css/docs.css")).unwrap();
        assert!(css.contains(".a .b"));
    }

    #[tokio::test]
    async fn dev_preview_serves_dev_build() {
        let temp = tempdir().unwrap();
        write_sources(temp.path());
        let session = session_for(temp.path().to_path_buf(), Environment::Dev);
        let runner = runner(&session);

        runner.run("build-docs").await.unwrap();
        runner.run("webserver-init").await.unwrap();

        let config = session.preview.config();
        let fallback = config.root.join(config.fallback.as_deref().unwrap());
        assert_eq!(fallback, temp.path().join("temp/docs/index.html"));
        assert!(fallback.exists());
        assert!(!temp.path().join("docs").exists());

        let addr = session.preview.local_addr().unwrap();
        let page = reqwest::get(format!("http://{addr}/temp/docs/"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(page.contains("<h1>Hi</h1>"));
        assert!(page.contains("/livereload.js\"></script>"));

        let css = reqwest::get(format!("http://{addr}/css/docs.css"))
            .await
            .unwrap();
        assert_eq!(css.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn watch_is_limited_to_sources() {
        let temp = tempdir().unwrap();
        write_sources(temp.path());
        fs::create_dir_all(temp.path().join("node_modules/bootstrap")).unwrap();
        let session = session(temp.path().to_path_buf());
        let runner = runner(&session);

        runner.run("watch:livereload").await.unwrap();

        let watch = session.watch.lock().unwrap();
        let (_, watcher) = watch.as_ref().unwrap();
        assert_eq!(
            watcher.root(),
            temp.path().join("src/docs").canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn livereload_init_is_idempotent() {
        let temp = tempdir().unwrap();
        let session = session(temp.path().to_path_buf());
        let runner = runner(&session);

        runner.run("livereload-init").await.unwrap();
        let addr = session.reload.local_addr();
        runner.run("livereload-init").await.unwrap();

        assert!(addr.is_some());
        assert_eq!(session.reload.local_addr(), addr);
        assert!(session.is_serving());
    }
}
