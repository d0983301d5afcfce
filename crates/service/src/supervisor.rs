//! Supervised task set: every spawned task reports how it ended on one
//! channel, and the whole set can be cancelled and drained together.

use std::{any::Any, future::Future, panic::AssertUnwindSafe, time::Duration};

use {
    futures::FutureExt,
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

/// What a task is expected to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRole {
    /// Runs to completion during startup (e.g. dashboard init).
    Startup,
    /// Runs until cancelled; returning early is a failure (e.g. the API server).
    Service,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Completed,
    Failed(anyhow::Error),
    Panicked(String),
}

#[derive(Debug)]
pub struct TaskExit {
    pub name: &'static str,
    pub role: TaskRole,
    pub outcome: TaskOutcome,
}

impl TaskExit {
    /// Whether this exit should bring the service down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            (self.role, &self.outcome),
            (TaskRole::Startup, TaskOutcome::Completed)
        )
    }
}

pub struct Supervisor {
    cancel: CancellationToken,
    exits_tx: mpsc::UnboundedSender<TaskExit>,
    exits_rx: mpsc::UnboundedReceiver<TaskExit>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    /// Tasks receive children of `parent`; cancelling it stops them all.
    pub fn new(parent: &CancellationToken) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            cancel: parent.child_token(),
            exits_tx,
            exits_rx,
            tasks: Vec::new(),
        }
    }

    /// Token handed to supervised tasks.
    pub fn token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn spawn<F>(&mut self, name: &'static str, role: TaskRole, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let exits = self.exits_tx.clone();
        let handle = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => TaskOutcome::Completed,
                Ok(Err(e)) => TaskOutcome::Failed(e),
                Err(panic) => TaskOutcome::Panicked(panic_message(panic.as_ref())),
            };
            debug!(task = name, ?role, ?outcome, "supervised task exited");
            let _ = exits.send(TaskExit {
                name,
                role,
                outcome,
            });
        });
        self.tasks.push((name, handle));
    }

    /// Next task exit. Pending forever while tasks are running and none exit.
    pub async fn next_exit(&mut self) -> Option<TaskExit> {
        self.exits_rx.recv().await
    }

    /// Cancel every task, wait up to `grace` for them to finish, then abort
    /// the rest. Returns the names of tasks that had to be aborted.
    pub async fn shutdown(self, grace: Duration) -> Vec<&'static str> {
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = Vec::new();
        for (name, mut handle) in self.tasks {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(task = name, "task did not stop within grace period, aborting");
                handle.abort();
                aborted.push(name);
            }
        }
        aborted
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
