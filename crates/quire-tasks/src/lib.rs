//! Named task graph with sequential and parallel composition.
//!
//! Tasks are registered into a [`TaskRegistry`], validated once into a
//! [`TaskGraph`], and executed by a [`TaskRunner`]. A task's prerequisites
//! always finish before its own body starts; sequences stop at the first
//! failure.

pub mod error;
pub mod graph;
pub mod runner;

pub use error::{BoxError, TaskError};
pub use graph::{Action, Step, Task, TaskFuture, TaskGraph, TaskRegistry, WorkFn};
pub use runner::{format_elapsed, TaskContext, TaskRunner};
