//! Task records built up from the event stream

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::protocol::{Message, StreamEvent, Task, TaskState, TaskStatus};

/// Storage backend for tasks
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, task_id: &str) -> Result<Option<Task>>;

    async fn save(&self, task: Task) -> Result<()>;
}

/// Process-local task store
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.tasks.read().await.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn save(&self, task: Task) -> Result<()> {
        self.tasks.write().await.insert(task.id.clone(), task);
        Ok(())
    }
}

/// Fold one published event into the task it belongs to. The task is
/// created on its first event; `message` seeds the history of a new task.
pub async fn apply_event(
    store: &dyn TaskStore,
    event: &StreamEvent,
    message: Option<&Message>,
) -> Result<Option<Task>> {
    let (task_id, context_id) = match event {
        StreamEvent::Task(task) => {
            store.save(task.clone()).await?;
            return Ok(Some(task.clone()));
        }
        StreamEvent::Message(_) => return Ok(None),
        StreamEvent::StatusUpdate(update) => (&update.task_id, &update.context_id),
        StreamEvent::ArtifactUpdate(update) => (&update.task_id, &update.context_id),
    };

    let mut task = match store.get(task_id).await? {
        Some(task) => task,
        None => Task {
            id: task_id.clone(),
            context_id: context_id.clone(),
            status: TaskStatus::new(TaskState::Submitted, None),
            history: message.into_iter().cloned().collect(),
            artifacts: Vec::new(),
        },
    };

    match event {
        StreamEvent::StatusUpdate(update) => {
            // The previous interim message moves into history
            if let Some(previous) = task.status.message.take() {
                task.history.push(previous);
            }
            task.status = update.status.clone();
        }
        StreamEvent::ArtifactUpdate(update) => task.artifacts.push(update.artifact.clone()),
        _ => {}
    }

    debug!("Task {} is now {}", task.id, task.status.state);
    store.save(task.clone()).await?;
    Ok(Some(task))
}
