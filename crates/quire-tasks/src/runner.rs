//! Task execution: prerequisite resolution, sequences, and parallel groups.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use crate::error::TaskError;
use crate::graph::{Action, Step, Task, TaskGraph};

/// Runs tasks from a validated [`TaskGraph`].
///
/// Cheap to clone; clones share the same graph.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    graph: Arc<TaskGraph>,
}

/// Handle passed to every task body.
///
/// Tasks started through the context inherit the caller's chain of
/// running tasks, so re-entering a running task is reported as a cycle.
#[derive(Debug, Clone)]
pub struct TaskContext {
    runner: TaskRunner,
    chain: Vec<String>,
}

impl TaskContext {
    /// Name of the task this context belongs to.
    pub fn task_name(&self) -> &str {
        self.chain.last().map(String::as_str).unwrap_or_default()
    }

    /// The runner that invoked this task.
    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Run another task as part of this one.
    pub async fn run(&self, name: &str) -> Result<(), TaskError> {
        self.runner.run_with(name, self.chain.clone()).await
    }

    /// Run steps in order as part of this task.
    pub async fn run_sequence<S: Into<Step>>(
        &self,
        steps: impl IntoIterator<Item = S>,
    ) -> Result<(), TaskError> {
        let steps: Vec<Step> = steps.into_iter().map(Into::into).collect();
        self.runner.sequence_with(&steps, &self.chain).await
    }

    /// Run tasks concurrently as part of this task.
    pub async fn run_parallel<S: AsRef<str>>(&self, names: &[S]) -> Result<(), TaskError> {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.runner.parallel_with(&names, &self.chain).await
    }
}

impl TaskRunner {
    /// Create a runner over a validated graph.
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            graph: Arc::new(graph),
        }
    }

    /// The graph this runner executes.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Run a task after its prerequisites.
    ///
    /// Prerequisites are resolved depth-first, left to right. Within one
    /// call every task runs at most once.
    pub async fn run(&self, name: &str) -> Result<(), TaskError> {
        self.run_with(name, Vec::new()).await
    }

    /// Run steps strictly in order, stopping at the first failure.
    pub async fn run_sequence<S: Into<Step>>(
        &self,
        steps: impl IntoIterator<Item = S>,
    ) -> Result<(), TaskError> {
        let steps: Vec<Step> = steps.into_iter().map(Into::into).collect();
        self.sequence_with(&steps, &[]).await
    }

    /// Run tasks concurrently and wait for all of them.
    ///
    /// A single failure is returned as is; several failures are returned
    /// together as [`TaskError::Parallel`].
    pub async fn run_parallel<S: AsRef<str>>(&self, names: &[S]) -> Result<(), TaskError> {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.parallel_with(&names, &[]).await
    }

    fn run_with(&self, name: &str, chain: Vec<String>) -> BoxFuture<'_, Result<(), TaskError>> {
        let name = name.to_string();
        async move {
            let mut done = HashSet::new();
            self.execute(name, chain, &mut done).await
        }
        .boxed()
    }

    fn execute<'a>(
        &'a self,
        name: String,
        chain: Vec<String>,
        done: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, Result<(), TaskError>> {
        async move {
            if done.contains(&name) {
                return Ok(());
            }

            if let Some(start) = chain.iter().position(|running| *running == name) {
                let mut path = chain[start..].to_vec();
                path.push(name);
                return Err(TaskError::Cycle(path));
            }

            let task = self
                .graph
                .get(&name)
                .cloned()
                .ok_or_else(|| TaskError::NotFound(name.clone()))?;

            let mut chain = chain;
            chain.push(name.clone());

            for prerequisite in task.prerequisites() {
                self.execute(prerequisite.clone(), chain.clone(), done)
                    .await?;
            }

            self.invoke(&task, &chain).await?;
            done.insert(name);

            Ok(())
        }
        .boxed()
    }

    async fn invoke(&self, task: &Task, chain: &[String]) -> Result<(), TaskError> {
        let started = Instant::now();
        tracing::info!("Starting '{}'...", task.name());

        let result = match task.action() {
            Action::None => Ok(()),
            Action::Sequence(steps) => self.sequence_with(steps, chain).await,
            Action::Work(work) => {
                let ctx = TaskContext {
                    runner: self.clone(),
                    chain: chain.to_vec(),
                };
                work(ctx).await.map_err(|e| TaskError::Failed {
                    task: task.name().to_string(),
                    source: e.into(),
                })
            }
        };

        match &result {
            Ok(()) => tracing::info!(
                "Finished '{}' after {}",
                task.name(),
                format_elapsed(started.elapsed())
            ),
            Err(e) => tracing::error!(
                "'{}' errored after {}: {}",
                task.name(),
                format_elapsed(started.elapsed()),
                e
            ),
        }

        result
    }

    fn sequence_with<'a>(
        &'a self,
        steps: &'a [Step],
        chain: &'a [String],
    ) -> BoxFuture<'a, Result<(), TaskError>> {
        async move {
            for step in steps {
                match step {
                    Step::Task(name) => self.run_with(name, chain.to_vec()).await?,
                    Step::Parallel(names) => self.parallel_with(names, chain).await?,
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn parallel_with(&self, names: &[String], chain: &[String]) -> Result<(), TaskError> {
        let results = join_all(names.iter().map(|name| self.run_with(name, chain.to_vec()))).await;

        let mut errors: Vec<TaskError> = results.into_iter().filter_map(Result::err).collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(TaskError::Parallel(errors)),
        }
    }
}

/// Human readable duration, `"850 ms"` or `"1.24 s"`.
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_millis() < 1000 {
        format!("{} ms", elapsed.as_millis())
    } else {
        format!("{:.2} s", elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskRegistry;

    #[test]
    fn formats_elapsed_time() {
        assert_eq!(format_elapsed(Duration::from_millis(850)), "850 ms");
        assert_eq!(format_elapsed(Duration::from_millis(1240)), "1.24 s");
    }

    #[tokio::test]
    async fn context_knows_its_task() {
        let mut registry = TaskRegistry::new();
        registry
            .register("named", &[], |ctx: TaskContext| async move {
                anyhow::ensure!(ctx.task_name() == "named", "wrong name {}", ctx.task_name());
                Ok::<(), anyhow::Error>(())
            })
            .unwrap();

        let runner = TaskRunner::new(registry.build().unwrap());
        runner.run("named").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_task_fails() {
        let runner = TaskRunner::new(TaskRegistry::new().build().unwrap());

        let err = runner.run("nope").await.unwrap_err();

        assert!(matches!(err, TaskError::NotFound(ref name) if name == "nope"));
    }

    #[tokio::test]
    async fn detects_runtime_cycle_through_context() {
        let mut registry = TaskRegistry::new();
        registry
            .register("outer", &[], |ctx: TaskContext| async move {
                ctx.run("inner").await?;
                Ok::<(), anyhow::Error>(())
            })
            .unwrap();
        registry
            .register("inner", &[], |ctx: TaskContext| async move {
                ctx.run("outer").await?;
                Ok::<(), anyhow::Error>(())
            })
            .unwrap();

        let runner = TaskRunner::new(registry.build().unwrap());
        let err = runner.run("outer").await.unwrap_err();

        // The cycle surfaces wrapped in the failures of both bodies.
        assert_eq!(err.failed_task(), Some("outer"));
        assert!(
            err.to_string()
                .contains("Cyclic dependency: outer -> inner -> outer"),
            "unexpected error: {err}"
        );
    }
}
