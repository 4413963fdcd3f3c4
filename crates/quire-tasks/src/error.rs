//! Errors produced while registering, validating, or running tasks.

/// Boxed error coming out of a task body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in the task graph.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task name must not be empty")]
    EmptyName,

    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("Task '{task}' references unknown task '{missing}'")]
    UnknownReference { task: String, missing: String },

    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Task '{task}' failed: {source}")]
    Failed {
        task: String,
        #[source]
        source: BoxError,
    },

    #[error(
        "{} parallel tasks failed, first: {}",
        .0.len(),
        .0.first().map(ToString::to_string).unwrap_or_default()
    )]
    Parallel(Vec<TaskError>),
}

impl TaskError {
    /// Name of the task whose body failed, if this is a body failure.
    ///
    /// For parallel failures this is the first failed task.
    pub fn failed_task(&self) -> Option<&str> {
        match self {
            TaskError::Failed { task, .. } => Some(task),
            TaskError::Parallel(errors) => errors.first().and_then(|e| e.failed_task()),
            _ => None,
        }
    }
}
