//! Execution order of prerequisites, sequences, and parallel groups.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use quire_tasks::{Step, TaskContext, TaskError, TaskRegistry, TaskRunner};

type Log = Arc<Mutex<Vec<String>>>;

/// Register a task that appends its name to `log`.
fn recording(registry: &mut TaskRegistry, log: &Log, name: &str, prerequisites: &[&str]) {
    let log = Arc::clone(log);
    let entry = name.to_string();
    registry
        .register(name, prerequisites, move |_ctx: TaskContext| {
            let log = Arc::clone(&log);
            let entry = entry.clone();
            async move {
                log.lock().unwrap().push(entry);
                Ok::<(), anyhow::Error>(())
            }
        })
        .unwrap();
}

/// Register a task that fails with `message`.
fn failing(registry: &mut TaskRegistry, name: &str, message: &'static str) {
    registry
        .register(name, &[], move |_ctx: TaskContext| async move {
            Err::<(), anyhow::Error>(anyhow::anyhow!(message))
        })
        .unwrap();
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn prerequisite_chain_runs_leaf_first_once_each() {
    let log = Log::default();
    let mut registry = TaskRegistry::new();
    recording(&mut registry, &log, "a", &["b"]);
    recording(&mut registry, &log, "b", &["c"]);
    recording(&mut registry, &log, "c", &[]);

    let runner = TaskRunner::new(registry.build().unwrap());
    runner.run("a").await.unwrap();

    assert_eq!(entries(&log), ["c", "b", "a"]);
}

#[tokio::test]
async fn prerequisites_resolve_left_to_right_and_share_work() {
    let log = Log::default();
    let mut registry = TaskRegistry::new();
    recording(&mut registry, &log, "d", &[]);
    recording(&mut registry, &log, "b", &["d"]);
    recording(&mut registry, &log, "c", &["d"]);
    recording(&mut registry, &log, "a", &["b", "c"]);

    let runner = TaskRunner::new(registry.build().unwrap());
    runner.run("a").await.unwrap();

    assert_eq!(entries(&log), ["d", "b", "c", "a"]);
}

#[tokio::test]
async fn sequence_stops_at_first_failure() {
    let log = Log::default();
    let mut registry = TaskRegistry::new();
    failing(&mut registry, "a", "a broke");
    recording(&mut registry, &log, "b", &[]);

    let runner = TaskRunner::new(registry.build().unwrap());
    let err = runner.run_sequence(["a", "b"]).await.unwrap_err();

    assert!(entries(&log).is_empty(), "b must never start");
    assert_eq!(err.failed_task(), Some("a"));
    assert!(err.to_string().contains("a broke"));
}

#[tokio::test]
async fn sequence_runs_each_step_with_its_prerequisites() {
    let log = Log::default();
    let mut registry = TaskRegistry::new();
    recording(&mut registry, &log, "setup", &[]);
    recording(&mut registry, &log, "first", &["setup"]);
    recording(&mut registry, &log, "second", &["setup"]);

    let runner = TaskRunner::new(registry.build().unwrap());
    runner.run_sequence(["first", "second"]).await.unwrap();

    // Each step is its own run, so shared prerequisites run again.
    assert_eq!(entries(&log), ["setup", "first", "setup", "second"]);
}

#[tokio::test]
async fn parallel_group_finishes_before_continuation() {
    let log = Log::default();
    let mut registry = TaskRegistry::new();

    for name in ["vendor", "css"] {
        let log = Arc::clone(&log);
        registry
            .register(name, &[], move |ctx: TaskContext| {
                let log = Arc::clone(&log);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    log.lock().unwrap().push(ctx.task_name().to_string());
                    Ok::<(), anyhow::Error>(())
                }
            })
            .unwrap();
    }
    recording(&mut registry, &log, "clean", &[]);
    recording(&mut registry, &log, "html", &[]);
    registry
        .register_sequence(
            "build",
            &[],
            vec![
                Step::from("clean"),
                Step::parallel(["vendor", "css"]),
                Step::from("html"),
            ],
        )
        .unwrap();

    let runner = TaskRunner::new(registry.build().unwrap());
    runner.run("build").await.unwrap();

    let log = entries(&log);
    assert_eq!(log.len(), 4);
    assert_eq!(log[0], "clean");
    assert_eq!(log[3], "html");
    let mut middle = log[1..3].to_vec();
    middle.sort();
    assert_eq!(middle, ["css", "vendor"]);
}

#[tokio::test]
async fn parallel_tasks_overlap() {
    let mut registry = TaskRegistry::new();
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    for name in ["left", "right"] {
        let barrier = Arc::clone(&barrier);
        registry
            .register(name, &[], move |_ctx: TaskContext| {
                let barrier = Arc::clone(&barrier);
                async move {
                    // Only completes if both bodies are in flight at once.
                    barrier.wait().await;
                    Ok::<(), anyhow::Error>(())
                }
            })
            .unwrap();
    }

    let runner = TaskRunner::new(registry.build().unwrap());
    tokio::time::timeout(Duration::from_secs(2), runner.run_parallel(&["left", "right"]))
        .await
        .expect("parallel tasks did not overlap")
        .unwrap();
}

#[tokio::test]
async fn parallel_failures_are_all_preserved() {
    let log = Log::default();
    let mut registry = TaskRegistry::new();
    failing(&mut registry, "x", "x broke");
    failing(&mut registry, "y", "y broke");
    recording(&mut registry, &log, "z", &[]);

    let runner = TaskRunner::new(registry.build().unwrap());

    let err = runner.run_parallel(&["x", "y", "z"]).await.unwrap_err();
    match err {
        TaskError::Parallel(errors) => {
            let failed: Vec<_> = errors.iter().filter_map(|e| e.failed_task()).collect();
            assert_eq!(failed, ["x", "y"]);
        }
        other => panic!("expected parallel error, got {other}"),
    }
    // Siblings of a failing task still run to completion.
    assert_eq!(entries(&log), ["z"]);

    let err = runner.run_parallel(&["x", "z"]).await.unwrap_err();
    assert_eq!(err.failed_task(), Some("x"));
}

#[tokio::test]
async fn alias_runs_only_prerequisites() {
    let log = Log::default();
    let mut registry = TaskRegistry::new();
    recording(&mut registry, &log, "serve", &[]);
    registry.register_alias("default", &["serve"]).unwrap();

    let runner = TaskRunner::new(registry.build().unwrap());
    runner.run("default").await.unwrap();

    assert_eq!(entries(&log), ["serve"]);
}

#[tokio::test]
async fn context_can_compose_other_tasks() {
    let log = Log::default();
    let mut registry = TaskRegistry::new();
    recording(&mut registry, &log, "one", &[]);
    recording(&mut registry, &log, "two", &[]);
    recording(&mut registry, &log, "three", &[]);
    registry
        .register("outer", &[], |ctx: TaskContext| async move {
            ctx.run_sequence(vec![Step::from("one"), Step::parallel(["two"])])
                .await?;
            ctx.run_parallel(&["three"]).await?;
            Ok::<(), anyhow::Error>(())
        })
        .unwrap();

    let runner = TaskRunner::new(registry.build().unwrap());
    runner.run("outer").await.unwrap();

    assert_eq!(entries(&log), ["one", "two", "three"]);
}
