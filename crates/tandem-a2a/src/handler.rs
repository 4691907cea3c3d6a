//! Request handler: maps A2A methods onto an [`AgentExecutor`]
//!
//! Each `message/*` request runs its executor on a spawned task. Events
//! flow back over an [`EventQueue`] and are folded into the task store as
//! they are consumed.

use futures_util::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::convert;
use crate::error::A2aError;
use crate::executor::{AgentExecutor, CallContext, EventQueue, RequestContext};
use crate::protocol::{
    Message, MessageSendParams, SendMessageResult, StreamEvent, Task, TaskIdParams,
    TaskQueryParams,
};
use crate::task_store::{TaskStore, apply_event};

pub type EventStream = BoxStream<'static, Result<StreamEvent, A2aError>>;

#[derive(Clone)]
pub struct RequestHandler {
    executor: Arc<dyn AgentExecutor>,
    tasks: Arc<dyn TaskStore>,
}

impl RequestHandler {
    pub fn new(executor: Arc<dyn AgentExecutor>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { executor, tasks }
    }

    /// Resolve task and context ids for an inbound message
    async fn build_context(
        &self,
        params: MessageSendParams,
        call_context: CallContext,
    ) -> Result<RequestContext, A2aError> {
        let mut message = params.message;

        let current_task = match &message.task_id {
            Some(task_id) => Some(
                self.tasks
                    .get(task_id)
                    .await?
                    .ok_or_else(|| A2aError::TaskNotFound(task_id.clone()))?,
            ),
            None => None,
        };

        let task_id = message
            .task_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let context_id = message
            .context_id
            .clone()
            .or_else(|| current_task.as_ref().map(|t| t.context_id.clone()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        message.task_id = Some(task_id.clone());
        message.context_id = Some(context_id.clone());

        if let Some(task) = &current_task {
            // A rejected follow-up must not reach the task history
            convert::message_to_internal(&message.parts)?;
            let mut task = task.clone();
            task.history.push(message.clone());
            self.tasks.save(task).await?;
        }

        Ok(RequestContext {
            task_id,
            context_id,
            message: Some(message),
            current_task,
            call_context,
        })
    }

    fn spawn_execute(
        &self,
        context: RequestContext,
    ) -> (mpsc::UnboundedReceiver<StreamEvent>, JoinHandle<Result<(), A2aError>>) {
        let (queue, rx) = EventQueue::new();
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move { executor.execute(context, queue).await });
        (rx, handle)
    }

    /// `message/send`: run the turn and return the task once it is final
    pub async fn on_message_send(
        &self,
        params: MessageSendParams,
        call_context: CallContext,
    ) -> Result<SendMessageResult, A2aError> {
        let context = self.build_context(params, call_context).await?;
        let task_id = context.task_id.clone();
        let inbound = context.message.clone();
        if let Some(message) = &inbound {
            info!("message/send for task {}: {}", task_id, preview(message));
        }

        let (mut rx, handle) = self.spawn_execute(context);
        let mut last: Option<Task> = None;
        while let Some(event) = rx.recv().await {
            if let StreamEvent::Message(message) = &event {
                return Ok(SendMessageResult::Message(message.clone()));
            }
            let is_final = event.is_final();
            if let Some(task) = apply_event(self.tasks.as_ref(), &event, inbound.as_ref()).await? {
                last = Some(task);
            }
            if is_final {
                return last
                    .map(SendMessageResult::Task)
                    .ok_or_else(|| A2aError::Internal(anyhow::anyhow!("final event without a task")));
            }
        }

        // Queue closed without a final event: surface the executor outcome
        join_outcome(handle).await?;
        match last {
            Some(task) => Ok(SendMessageResult::Task(task)),
            None => Err(A2aError::Internal(anyhow::anyhow!(
                "Agent produced no events for task {}",
                task_id
            ))),
        }
    }

    /// `message/stream`: events as they are produced, ending after the
    /// final one. A failing executor ends the stream with an error item.
    pub async fn on_message_stream(
        &self,
        params: MessageSendParams,
        call_context: CallContext,
    ) -> Result<EventStream, A2aError> {
        let context = self.build_context(params, call_context).await?;
        let inbound = context.message.clone();
        if let Some(message) = &inbound {
            info!("message/stream for task {}: {}", context.task_id, preview(message));
        }
        let (mut rx, handle) = self.spawn_execute(context);
        let tasks = self.tasks.clone();

        Ok(Box::pin(async_stream::stream! {
            let mut finished = false;
            while let Some(event) = rx.recv().await {
                if let Err(e) = apply_event(tasks.as_ref(), &event, inbound.as_ref()).await {
                    warn!("Failed to record task event: {:#}", e);
                }
                finished = event.is_final();
                yield Ok(event);
                if finished {
                    break;
                }
            }
            if !finished {
                if let Err(e) = join_outcome(handle).await {
                    yield Err(e);
                }
            }
        }))
    }

    /// `tasks/get`
    pub async fn on_get_task(&self, params: TaskQueryParams) -> Result<Task, A2aError> {
        let mut task = self
            .tasks
            .get(&params.id)
            .await?
            .ok_or_else(|| A2aError::TaskNotFound(params.id.clone()))?;
        if let Some(limit) = params.history_length {
            let skip = task.history.len().saturating_sub(limit);
            task.history.drain(..skip);
        }
        Ok(task)
    }

    /// `tasks/cancel`
    pub async fn on_cancel_task(
        &self,
        params: TaskIdParams,
        call_context: CallContext,
    ) -> Result<Task, A2aError> {
        let task = self
            .tasks
            .get(&params.id)
            .await?
            .ok_or_else(|| A2aError::TaskNotFound(params.id.clone()))?;
        if task.status.state.is_terminal() {
            debug!("Cancel requested for finished task {}", task.id);
        }

        let context = RequestContext {
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            message: None,
            current_task: Some(task.clone()),
            call_context,
        };
        let (queue, mut rx) = EventQueue::new();
        self.executor.cancel(context, queue).await?;

        while let Ok(event) = rx.try_recv() {
            apply_event(self.tasks.as_ref(), &event, None).await?;
        }
        self.tasks
            .get(&task.id)
            .await?
            .ok_or_else(|| A2aError::TaskNotFound(task.id.clone()))
    }
}

async fn join_outcome(handle: JoinHandle<Result<(), A2aError>>) -> Result<(), A2aError> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(A2aError::Internal(anyhow::anyhow!("Agent task panicked: {}", e))),
    }
}

/// Inbound message text, for logging
pub fn preview(message: &Message) -> String {
    let text = message.text();
    match text.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{AgentTurnExecutor, TaskUpdater};
    use crate::protocol::{FileContent, Part, TaskState};
    use crate::task_store::InMemoryTaskStore;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use tandem_core::content::{self, Content};
    use tandem_core::runtime::{AgentRuntime, TurnEvent, TurnStream};
    use tandem_core::session::SessionManager;

    struct EchoRuntime {
        sessions: SessionManager,
    }

    impl AgentRuntime for EchoRuntime {
        fn app_name(&self) -> &str {
            self.sessions.app_name()
        }
        fn sessions(&self) -> &SessionManager {
            &self.sessions
        }
        fn run(&self, _user_id: &str, _session_id: &str, new_message: Content) -> TurnStream {
            let reply = format!("echo: {}", new_message.text());
            Box::pin(futures_util::stream::iter(vec![Ok(TurnEvent::Final(Content::model(
                vec![content::Part::text(reply)],
            )))]))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl AgentExecutor for FailingExecutor {
        async fn execute(&self, context: RequestContext, queue: EventQueue) -> Result<(), A2aError> {
            let updater = TaskUpdater::new(queue, context.task_id, context.context_id);
            updater.update_status(TaskState::Working, None, false);
            Err(A2aError::Internal(anyhow::anyhow!("runtime crashed")))
        }
        async fn cancel(&self, _context: RequestContext, _queue: EventQueue) -> Result<(), A2aError> {
            Err(A2aError::UnsupportedOperation)
        }
    }

    fn handler() -> (RequestHandler, Arc<InMemoryTaskStore>) {
        let runtime = Arc::new(EchoRuntime {
            sessions: SessionManager::in_memory("Echo"),
        });
        let tasks = Arc::new(InMemoryTaskStore::new());
        let handler = RequestHandler::new(Arc::new(AgentTurnExecutor::new(runtime)), tasks.clone());
        (handler, tasks)
    }

    fn params(message: Message) -> MessageSendParams {
        MessageSendParams {
            message,
            configuration: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_send_returns_completed_task() {
        let (handler, tasks) = handler();
        let result = handler
            .on_message_send(params(Message::user_text("hello")), CallContext::default())
            .await
            .unwrap();

        let SendMessageResult::Task(task) = result else {
            panic!("expected a task");
        };
        assert_eq!(task.status.state, TaskState::Completed);
        assert_eq!(task.artifact_text(), "echo: hello");
        assert_eq!(task.history[0].text(), "hello");
        assert_eq!(tasks.count().await, 1);
    }

    #[tokio::test]
    async fn test_follow_up_reuses_task_and_context() {
        let (handler, _tasks) = handler();
        let SendMessageResult::Task(first) = handler
            .on_message_send(params(Message::user_text("one")), CallContext::default())
            .await
            .unwrap()
        else {
            panic!("expected a task");
        };

        let follow_up = Message::user_text("two").with_task_id(first.id.clone());
        let SendMessageResult::Task(second) = handler
            .on_message_send(params(follow_up), CallContext::default())
            .await
            .unwrap()
        else {
            panic!("expected a task");
        };
        assert_eq!(second.id, first.id);
        assert_eq!(second.context_id, first.context_id);
        assert_eq!(second.artifacts.len(), 2);
    }

    #[tokio::test]
    async fn test_send_unknown_task_id() {
        let (handler, _tasks) = handler();
        let err = handler
            .on_message_send(
                params(Message::user_text("x").with_task_id("missing")),
                CallContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, A2aError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_send_unsupported_part_is_invalid_params() {
        let (handler, tasks) = handler();
        let message = Message::user(vec![Part::File { file: FileContent::default() }]);
        let err = handler
            .on_message_send(params(message), CallContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::protocol::INVALID_PARAMS);
        assert_eq!(tasks.count().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_follow_up_not_in_history() {
        let (handler, _tasks) = handler();
        let SendMessageResult::Task(first) = handler
            .on_message_send(params(Message::user_text("one")), CallContext::default())
            .await
            .unwrap()
        else {
            panic!("expected a task");
        };

        let query = || TaskQueryParams {
            id: first.id.clone(),
            history_length: None,
        };
        let before = handler.on_get_task(query()).await.unwrap().history.len();

        let follow_up = Message::user(vec![Part::File { file: FileContent::default() }])
            .with_task_id(first.id.clone());
        let err = handler
            .on_message_send(params(follow_up), CallContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::protocol::INVALID_PARAMS);

        let task = handler.on_get_task(query()).await.unwrap();
        assert_eq!(task.history.len(), before);
    }

    #[tokio::test]
    async fn test_stream_yields_until_final() {
        let (handler, _tasks) = handler();
        let events: Vec<_> = handler
            .on_message_stream(params(Message::user_text("hi")), CallContext::default())
            .await
            .unwrap()
            .collect()
            .await;

        let kinds: Vec<String> = events
            .iter()
            .map(|e| match e.as_ref().unwrap() {
                StreamEvent::StatusUpdate(u) => u.status.state.to_string(),
                StreamEvent::ArtifactUpdate(_) => "artifact".to_string(),
                other => format!("{:?}", other),
            })
            .collect();
        assert_eq!(kinds, vec!["submitted", "working", "artifact", "completed"]);
        assert!(events.last().unwrap().as_ref().unwrap().is_final());
    }

    #[tokio::test]
    async fn test_executor_failure_surfaces_as_internal() {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let handler = RequestHandler::new(Arc::new(FailingExecutor), tasks);

        let err = handler
            .on_message_send(params(Message::user_text("x")), CallContext::default())
            .await
            .unwrap_err();
        assert!(err.is_internal());

        let events: Vec<_> = handler
            .on_message_stream(params(Message::user_text("x")), CallContext::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].as_ref().unwrap_err().is_internal());
    }

    #[tokio::test]
    async fn test_get_and_cancel() {
        let (handler, _tasks) = handler();
        let SendMessageResult::Task(task) = handler
            .on_message_send(params(Message::user_text("hello")), CallContext::default())
            .await
            .unwrap()
        else {
            panic!("expected a task");
        };

        let fetched = handler
            .on_get_task(TaskQueryParams {
                id: task.id.clone(),
                history_length: Some(0),
            })
            .await
            .unwrap();
        assert!(fetched.history.is_empty());

        let err = handler
            .on_cancel_task(TaskIdParams { id: task.id.clone() }, CallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, A2aError::UnsupportedOperation));

        let err = handler
            .on_cancel_task(TaskIdParams { id: "nope".into() }, CallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, A2aError::TaskNotFound(_)));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let p = preview(&Message::user_text(long));
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 103);
    }
}
