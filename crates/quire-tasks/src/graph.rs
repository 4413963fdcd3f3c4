//! Task registration and the validated task graph.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::error::TaskError;
use crate::runner::TaskContext;

/// Future returned by a task body.
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A task body. Called once per invocation of the task.
pub type WorkFn = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

/// One step of a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Run a single task.
    Task(String),

    /// Run several tasks concurrently and wait for all of them.
    Parallel(Vec<String>),
}

impl Step {
    /// Build a parallel step from task names.
    pub fn parallel<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Step::Parallel(names.into_iter().map(Into::into).collect())
    }

    /// Task names referenced by this step.
    pub fn names(&self) -> &[String] {
        match self {
            Step::Task(name) => std::slice::from_ref(name),
            Step::Parallel(names) => names,
        }
    }
}

impl From<&str> for Step {
    fn from(name: &str) -> Self {
        Step::Task(name.to_string())
    }
}

impl From<String> for Step {
    fn from(name: String) -> Self {
        Step::Task(name)
    }
}

impl From<&String> for Step {
    fn from(name: &String) -> Self {
        Step::Task(name.clone())
    }
}

/// What a task does once its prerequisites are done.
#[derive(Clone)]
pub enum Action {
    /// Run an async body.
    Work(WorkFn),

    /// Run a list of steps in order.
    Sequence(Vec<Step>),

    /// Nothing; the task only groups prerequisites.
    None,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Work(_) => f.write_str("Work(..)"),
            Action::Sequence(steps) => f.debug_tuple("Sequence").field(steps).finish(),
            Action::None => f.write_str("None"),
        }
    }
}

/// A named unit of work with ordered prerequisites.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    prerequisites: Vec<String>,
    action: Action,
}

impl Task {
    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tasks that must complete before this one, in resolution order.
    pub fn prerequisites(&self) -> &[String] {
        &self.prerequisites
    }

    /// The task's own action.
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Every task name this task refers to, prerequisites first.
    fn references(&self) -> impl Iterator<Item = &String> {
        let steps: &[Step] = match &self.action {
            Action::Sequence(steps) => steps,
            _ => &[],
        };
        self.prerequisites
            .iter()
            .chain(steps.iter().flat_map(|s| s.names().iter()))
    }
}

/// Mutable collection of tasks, filled at startup.
///
/// Registering a name twice replaces the earlier definition.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task with an async body.
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        prerequisites: &[&str],
        work: F,
    ) -> Result<(), TaskError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let work: WorkFn = Arc::new(move |ctx| work(ctx).boxed());
        self.insert(name.into(), prerequisites, Action::Work(work))
    }

    /// Register a task whose body runs `steps` in order.
    pub fn register_sequence<S: Into<Step>>(
        &mut self,
        name: impl Into<String>,
        prerequisites: &[&str],
        steps: impl IntoIterator<Item = S>,
    ) -> Result<(), TaskError> {
        let steps = steps.into_iter().map(Into::into).collect();
        self.insert(name.into(), prerequisites, Action::Sequence(steps))
    }

    /// Register a task that only runs its prerequisites.
    pub fn register_alias(
        &mut self,
        name: impl Into<String>,
        prerequisites: &[&str],
    ) -> Result<(), TaskError> {
        self.insert(name.into(), prerequisites, Action::None)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task has been registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn insert(
        &mut self,
        name: String,
        prerequisites: &[&str],
        action: Action,
    ) -> Result<(), TaskError> {
        if name.trim().is_empty() {
            return Err(TaskError::EmptyName);
        }

        let task = Task {
            name: name.clone(),
            prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
            action,
        };

        if self.tasks.insert(name.clone(), task).is_some() {
            tracing::debug!(task = %name, "replaced existing task definition");
        } else {
            self.order.push(name);
        }

        Ok(())
    }

    /// Validate the registry and freeze it into a graph.
    ///
    /// Fails if any task refers to an unregistered name or if prerequisite
    /// and sequence edges form a cycle.
    pub fn build(self) -> Result<TaskGraph, TaskError> {
        let graph = TaskGraph {
            tasks: self.tasks,
            order: self.order,
        };
        graph.validate()?;
        Ok(graph)
    }
}

/// Validated, immutable set of tasks.
#[derive(Debug)]
pub struct TaskGraph {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

impl TaskGraph {
    /// Look up a task by name.
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Whether a task with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|name| self.tasks.get(name))
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn validate(&self) -> Result<(), TaskError> {
        // Edge direction: task -> referenced task.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in &self.order {
            graph.add_node(name.as_str());
        }

        for task in self.tasks() {
            for reference in task.references() {
                if !self.tasks.contains_key(reference) {
                    return Err(TaskError::UnknownReference {
                        task: task.name.clone(),
                        missing: reference.clone(),
                    });
                }
                graph.add_edge(task.name.as_str(), reference.as_str(), ());
            }
        }

        for component in tarjan_scc(&graph) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&node| graph.contains_edge(node, node));

            if cyclic {
                let mut path: Vec<String> = component.iter().map(|n| n.to_string()).collect();
                path.reverse();
                if let Some(first) = path.first().cloned() {
                    path.push(first);
                }
                return Err(TaskError::Cycle(path));
            }
        }

        Ok(())
    }
}
