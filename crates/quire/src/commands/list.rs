//! Listing registered tasks.

use std::fmt::Write;

use quire_tasks::{Action, Step, TaskGraph};

/// Render every task with its prerequisites and body, in registration order.
pub fn render(graph: &TaskGraph) -> String {
    let width = graph.tasks().map(|t| t.name().len()).max().unwrap_or(0);
    let mut out = String::new();

    for task in graph.tasks() {
        let mut parts = Vec::new();
        if !task.prerequisites().is_empty() {
            parts.push(format!("[{}]", task.prerequisites().join(", ")));
        }
        if let Action::Sequence(steps) = task.action() {
            let steps: Vec<String> = steps.iter().map(describe_step).collect();
            parts.push(steps.join(" -> "));
        }

        let line = format!("{:width$}  {}", task.name(), parts.join(" "), width = width);
        let _ = writeln!(out, "{}", line.trim_end());
    }

    out
}

fn describe_step(step: &Step) -> String {
    match step {
        Step::Task(name) => name.clone(),
        Step::Parallel(names) => format!("({})", names.join(" | ")),
    }
}

/// Print the task list.
pub fn run(graph: &TaskGraph) {
    print!("{}", render(graph));
}
