//! Tool-call resolution loop against scripted chat services

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use prompt_kernel::chat::{
    AuthorRole, FinishReason, FragmentStream, ToolCallDelta, MALFORMED_ARGUMENTS_MESSAGE,
};
use prompt_kernel::functions::FunctionDescriptor;
use prompt_kernel::{
    plugins, ChatCompletionService, ChatHistory, ChatMessage, FunctionCallingLoop, Kernel,
    KernelArguments, KernelError, NativeFunction, PromptExecutionSettings, StreamingChatMessage,
    ToolCall,
};
use serde_json::json;
use tokio::sync::Barrier;

/// Plays back canned replies and records every history it was sent
struct ScriptedService {
    replies: Mutex<VecDeque<ChatMessage>>,
    seen: Mutex<Vec<ChatHistory>>,
}

impl ScriptedService {
    fn new(replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::default(),
        }
    }

    fn requests(&self) -> usize {
        self.seen.lock().expect("lock").len()
    }
}

#[async_trait]
impl ChatCompletionService for ScriptedService {
    fn service_id(&self) -> &str {
        "scripted"
    }

    async fn complete_chat(
        &self,
        history: &ChatHistory,
        _settings: &PromptExecutionSettings,
        _tools: &[FunctionDescriptor],
    ) -> anyhow::Result<Vec<ChatMessage>> {
        self.seen.lock().expect("lock").push(history.clone());
        let reply = self.replies.lock().expect("lock").pop_front();
        Ok(reply.into_iter().collect())
    }
}

/// Always asks for another tool call
struct InsistentService {
    requests: AtomicUsize,
}

#[async_trait]
impl ChatCompletionService for InsistentService {
    fn service_id(&self) -> &str {
        "insistent"
    }

    async fn complete_chat(
        &self,
        _history: &ChatHistory,
        _settings: &PromptExecutionSettings,
        _tools: &[FunctionDescriptor],
    ) -> anyhow::Result<Vec<ChatMessage>> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ChatMessage::tool_requests(vec![ToolCall::new(
            format!("call_{}", n),
            "math-add",
            r#"{"x": 1, "y": 1}"#,
        )])])
    }
}

/// Streams scripted fragment rounds
struct StreamingService {
    rounds: Mutex<VecDeque<Vec<StreamingChatMessage>>>,
}

#[async_trait]
impl ChatCompletionService for StreamingService {
    fn service_id(&self) -> &str {
        "streaming"
    }

    async fn complete_chat(
        &self,
        _history: &ChatHistory,
        _settings: &PromptExecutionSettings,
        _tools: &[FunctionDescriptor],
    ) -> anyhow::Result<Vec<ChatMessage>> {
        anyhow::bail!("only streaming is scripted")
    }

    async fn complete_chat_stream(
        &self,
        _history: &ChatHistory,
        _settings: &PromptExecutionSettings,
        _tools: &[FunctionDescriptor],
    ) -> anyhow::Result<FragmentStream> {
        let fragments = self.rounds.lock().expect("lock").pop_front().unwrap_or_default();
        Ok(futures::stream::iter(fragments.into_iter().map(Ok)).boxed())
    }
}

fn kernel() -> Kernel {
    let mut kernel = Kernel::new();
    plugins::register_builtins(&mut kernel).expect("Should register builtins");
    kernel
}

fn user_history(text: &str) -> ChatHistory {
    let mut history = ChatHistory::new();
    history.add_user_message(text);
    history
}

fn roles(history: &ChatHistory) -> Vec<AuthorRole> {
    history.messages().iter().map(|m| m.role).collect()
}

#[tokio::test]
async fn test_tool_result_is_sent_back_to_model() {
    let kernel = kernel();
    let service = ScriptedService::new(vec![
        ChatMessage::tool_requests(vec![ToolCall::new(
            "call_1",
            "math-add",
            r#"{"x": 2, "y": 3}"#,
        )]),
        ChatMessage::assistant("The answer is 5"),
    ]);
    let mut history = user_history("What is 2 + 3?");

    let reply = FunctionCallingLoop::new(&kernel)
        .run(&service, &mut history, &PromptExecutionSettings::new(), &KernelArguments::new())
        .await
        .expect("Should resolve");

    assert_eq!(reply.text(), "The answer is 5");
    assert_eq!(
        roles(&history),
        vec![
            AuthorRole::User,
            AuthorRole::Assistant,
            AuthorRole::Tool,
            AuthorRole::Assistant,
        ]
    );

    let seen = service.seen.lock().expect("lock");
    let tool_message = &seen[1].messages()[2];
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_message.name.as_deref(), Some("math-add"));
    assert_eq!(tool_message.text(), "5");
}

#[tokio::test]
async fn test_tool_arguments_extend_caller_arguments() {
    let kernel = kernel();
    let service = ScriptedService::new(vec![
        ChatMessage::tool_requests(vec![ToolCall::new("c", "math-add", r#"{"y": 3}"#)]),
        ChatMessage::assistant("done"),
    ]);
    let mut history = user_history("add");
    let arguments = KernelArguments::new().with("x", 2);

    FunctionCallingLoop::new(&kernel)
        .run(&service, &mut history, &PromptExecutionSettings::new(), &arguments)
        .await
        .expect("Should resolve");

    assert_eq!(history.messages()[2].text(), "5");
    assert!(!arguments.contains("y"));
}

#[tokio::test]
async fn test_tool_calls_run_concurrently() {
    let mut kernel = Kernel::new();
    let barrier = Arc::new(Barrier::new(3));
    kernel
        .add_function(
            "sync",
            NativeFunction::new(FunctionDescriptor::native("wait"), move |args| {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Ok(json!(args.get_text("tag").unwrap_or_default()))
                }
            }),
        )
        .expect("Should register");

    let requests: Vec<ToolCall> = ["a", "b", "c"]
        .iter()
        .map(|tag| ToolCall::new(*tag, "sync-wait", json!({ "tag": tag }).to_string()))
        .collect();
    let mut history = ChatHistory::new();

    // Each call blocks until all three are running at once
    tokio::time::timeout(
        Duration::from_secs(5),
        FunctionCallingLoop::new(&kernel).resolve_tool_calls(
            &mut history,
            &requests,
            &KernelArguments::new(),
        ),
    )
    .await
    .expect("Tool calls should not run one after another")
    .expect("Should resolve");

    let contents: Vec<&str> = history.messages().iter().map(|m| m.text()).collect();
    assert_eq!(contents, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_malformed_arguments_are_reported_to_model() {
    let kernel = kernel();
    let service = ScriptedService::new(vec![
        ChatMessage::tool_requests(vec![ToolCall::new("bad", "math-add", "{oops")]),
        ChatMessage::assistant("sorry"),
    ]);
    let mut history = user_history("add");

    let reply = FunctionCallingLoop::new(&kernel)
        .run(&service, &mut history, &PromptExecutionSettings::new(), &KernelArguments::new())
        .await
        .expect("Should resolve");

    assert_eq!(reply.text(), "sorry");
    let tool_message = &history.messages()[2];
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("bad"));
    assert_eq!(tool_message.text(), MALFORMED_ARGUMENTS_MESSAGE);
}

#[tokio::test]
async fn test_attempts_are_bounded() {
    let kernel = kernel();
    let service = InsistentService {
        requests: AtomicUsize::new(0),
    };
    let mut history = user_history("loop forever");

    let reply = FunctionCallingLoop::new(&kernel)
        .with_max_attempts(3)
        .run(&service, &mut history, &PromptExecutionSettings::new(), &KernelArguments::new())
        .await
        .expect("Should stop");

    assert_eq!(service.requests.load(Ordering::SeqCst), 3);
    assert!(reply.has_tool_calls());
    assert_eq!(reply.finish_reason, Some(FinishReason::ToolCalls));
    // user + 3 replies + 2 resolved tool rounds
    assert_eq!(history.len(), 6);
}

#[tokio::test]
async fn test_auto_invoke_disabled_returns_tool_calls() {
    let kernel = kernel();
    let service = ScriptedService::new(vec![ChatMessage::tool_requests(vec![ToolCall::new(
        "c",
        "math-add",
        r#"{"x": 1, "y": 2}"#,
    )])]);
    let mut history = user_history("add");

    let reply = FunctionCallingLoop::new(&kernel)
        .with_auto_invoke(false)
        .run(&service, &mut history, &PromptExecutionSettings::new(), &KernelArguments::new())
        .await
        .expect("Should return");

    assert_eq!(service.requests(), 1);
    assert_eq!(reply.tool_calls.len(), 1);
    assert_eq!(roles(&history), vec![AuthorRole::User, AuthorRole::Assistant]);
}

#[tokio::test]
async fn test_unknown_tool_is_fatal() {
    let kernel = kernel();
    let service = ScriptedService::new(vec![ChatMessage::tool_requests(vec![ToolCall::new(
        "c",
        "math-divide",
        "{}",
    )])]);
    let mut history = user_history("divide");

    let err = FunctionCallingLoop::new(&kernel)
        .run(&service, &mut history, &PromptExecutionSettings::new(), &KernelArguments::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::FunctionNotFound { ref collection, ref function }
            if collection == "math" && function == "divide"
    ));
}

#[tokio::test]
async fn test_empty_reply_is_service_error() {
    let kernel = kernel();
    let service = ScriptedService::new(Vec::new());
    let mut history = user_history("hello?");

    let err = FunctionCallingLoop::new(&kernel)
        .run(&service, &mut history, &PromptExecutionSettings::new(), &KernelArguments::new())
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::Service(_)));
}

#[tokio::test]
async fn test_streaming_round_trip() {
    let kernel = kernel();
    let service = StreamingService {
        rounds: Mutex::new(VecDeque::from(vec![
            vec![
                StreamingChatMessage::tool_call(
                    0,
                    ToolCallDelta {
                        index: 0,
                        id: Some("call_1".to_string()),
                        name: Some("math-".to_string()),
                        arguments: Some(r#"{"x": 2, "#.to_string()),
                    },
                ),
                StreamingChatMessage::tool_call(
                    0,
                    ToolCallDelta {
                        index: 0,
                        id: None,
                        name: Some("multiply".to_string()),
                        arguments: Some(r#""y": 4}"#.to_string()),
                    },
                ),
                StreamingChatMessage::finish(0, FinishReason::ToolCalls),
            ],
            vec![
                StreamingChatMessage::text(0, "It is "),
                StreamingChatMessage::text(0, "8"),
                StreamingChatMessage::finish(0, FinishReason::Stop),
                // Never read: the round ends at the terminal fragment
                StreamingChatMessage::text(0, " (ignored)"),
            ],
        ])),
    };
    let mut history = user_history("2 * 4?");
    let mut fragments = 0;

    let reply = FunctionCallingLoop::new(&kernel)
        .run_streaming(
            &service,
            &mut history,
            &PromptExecutionSettings::new(),
            &KernelArguments::new(),
            |_| fragments += 1,
        )
        .await
        .expect("Should resolve");

    assert_eq!(reply.text(), "It is 8");
    assert_eq!(fragments, 6);
    assert_eq!(history.messages()[1].tool_calls[0].name, "math-multiply");
    assert_eq!(history.messages()[2].text(), "8");
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn test_default_stream_wraps_complete_chat() {
    let kernel = kernel();
    let service = ScriptedService::new(vec![ChatMessage::assistant("plain")]);
    let mut history = user_history("hi");

    let reply = FunctionCallingLoop::new(&kernel)
        .run_streaming(
            &service,
            &mut history,
            &PromptExecutionSettings::new(),
            &KernelArguments::new(),
            |_| {},
        )
        .await
        .expect("Should resolve");

    assert_eq!(reply.text(), "plain");
    assert_eq!(reply.role, AuthorRole::Assistant);
}

#[tokio::test]
async fn test_streaming_round_waits_for_reply_choice() {
    let kernel = kernel();
    let service = StreamingService {
        rounds: Mutex::new(VecDeque::from(vec![vec![
            StreamingChatMessage::text(0, "Hel"),
            StreamingChatMessage::text(1, "alt"),
            // Another choice finishing does not end the round
            StreamingChatMessage::finish(1, FinishReason::Stop),
            StreamingChatMessage::text(0, "lo"),
            StreamingChatMessage::finish(0, FinishReason::Stop),
        ]])),
    };
    let mut history = user_history("greet");

    let reply = FunctionCallingLoop::new(&kernel)
        .run_streaming(
            &service,
            &mut history,
            &PromptExecutionSettings::new(),
            &KernelArguments::new(),
            |_| {},
        )
        .await
        .expect("Should resolve");

    assert_eq!(reply.text(), "Hello");
    assert_eq!(reply.finish_reason, Some(FinishReason::Stop));
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_failed_round_appends_no_tool_messages() {
    let mut kernel = Kernel::new();
    kernel
        .add_function(
            "t",
            NativeFunction::from_fn(FunctionDescriptor::native("ok"), |_| Ok(json!("fine"))),
        )
        .expect("Should register");
    kernel
        .add_function(
            "t",
            NativeFunction::from_fn(FunctionDescriptor::native("bad"), |_| {
                Err(anyhow::anyhow!("boom"))
            }),
        )
        .expect("Should register");

    let requests = vec![
        ToolCall::new("a", "t-ok", "{}"),
        ToolCall::new("b", "t-bad", "{}"),
        ToolCall::new("c", "t-ok", "{}"),
    ];
    let mut history = ChatHistory::new();

    let err = FunctionCallingLoop::new(&kernel)
        .resolve_tool_calls(&mut history, &requests, &KernelArguments::new())
        .await
        .unwrap_err();

    assert_eq!(err.function_name(), Some("t.bad"));
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_malformed_arguments_checked_before_lookup() {
    let kernel = kernel();
    let requests = vec![ToolCall::new("x", "math-divide", "{oops")];
    let mut history = ChatHistory::new();

    FunctionCallingLoop::new(&kernel)
        .resolve_tool_calls(&mut history, &requests, &KernelArguments::new())
        .await
        .expect("Malformed arguments should be reported, not fail the round");

    let message = &history.messages()[0];
    assert_eq!(message.role, AuthorRole::Tool);
    assert_eq!(message.tool_call_id.as_deref(), Some("x"));
    assert_eq!(message.text(), MALFORMED_ARGUMENTS_MESSAGE);
}
