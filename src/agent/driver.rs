//! Conversation driver: the step-bounded tool loop.
//!
//! A turn is exposed as a lazy stream of [`TurnEvent`]s. Each step is one
//! model request; tool calls from that step are validated and echoed back
//! into the transcript before the next request. The consumer drives the
//! stream and cancels by dropping it. Nothing counts as delivered until the
//! `Finished` event has been observed, which is what [`TurnCollector`] enforces.

use anyhow::Result;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::providers::{LLMProvider, Message, Role, ToolCall, Usage, create_provider};
use super::tools::{ToolError, ToolOutput, ToolSet};
use crate::config::Config;

pub const DEFAULT_MAX_STEPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model answered without calling a tool
    Stop,
    /// The step bound was reached while the model was still calling tools
    StepLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub step: usize,
    pub tool_calls: Vec<ToolCall>,
    /// Transcript entries produced by this step, in order
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub enum TurnEvent {
    Text(String),
    ToolCall(ToolCall),
    ToolResult {
        call_id: String,
        name: String,
        output: ToolOutput,
    },
    ToolRejected {
        call_id: String,
        name: String,
        error: ToolError,
    },
    StepFinished(StepSummary),
    Finished {
        reason: FinishReason,
        usage: Usage,
    },
}

/// Side-effect hook run after every step. Diagnostic only.
#[cfg_attr(test, mockall::automock)]
pub trait StepObserver: Send + Sync {
    fn on_step_finish(&self, project_id: &str, step: &StepSummary);
}

/// Logs the tools called in each step.
pub struct LoggingObserver;

impl StepObserver for LoggingObserver {
    fn on_step_finish(&self, project_id: &str, step: &StepSummary) {
        if !step.tool_calls.is_empty() {
            let names: Vec<&str> = step.tool_calls.iter().map(|c| c.name.as_str()).collect();
            info!(
                "[Project {}] Step {} tool calls: {:?}",
                project_id, step.step, names
            );
        }
    }
}

pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnEvent>> + Send>>;

/// Everything the driver needs for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub project_id: String,
    pub system_prompt: String,
    /// Prior transcript, oldest first, ending with the new user message
    pub messages: Vec<Message>,
}

#[derive(Clone)]
pub struct ConversationDriver {
    provider: Arc<dyn LLMProvider>,
    tools: ToolSet,
    observer: Arc<dyn StepObserver>,
    max_steps: usize,
}

impl ConversationDriver {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            tools: ToolSet::default(),
            observer: Arc::new(LoggingObserver),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = create_provider(&config.agent.default_model, config)?;
        Ok(Self::new(Arc::from(provider)).with_max_steps(config.agent.max_steps))
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Start a turn. No request is made until the stream is first polled.
    pub fn run_turn(&self, request: TurnRequest) -> TurnStream {
        let driver = self.clone();

        Box::pin(async_stream::stream! {
            let TurnRequest { project_id, system_prompt, messages } = request;

            let mut transcript = Vec::with_capacity(messages.len() + 1);
            transcript.push(Message {
                role: Role::System,
                content: system_prompt,
                tool_calls: None,
                tool_call_id: None,
            });
            transcript.extend(messages);

            let schemas = driver.tools.schemas();
            let mut usage = Usage::default();
            let mut step = 0;

            let reason = loop {
                if step >= driver.max_steps {
                    warn!(
                        "[Project {}] Step limit of {} reached, ending turn",
                        project_id, driver.max_steps
                    );
                    break FinishReason::StepLimit;
                }
                step += 1;

                let response = match driver.provider.chat(&transcript, Some(&schemas)).await {
                    Ok(response) => response,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                if let Some(u) = response.usage {
                    usage.input_tokens += u.input_tokens;
                    usage.output_tokens += u.output_tokens;
                }

                if !response.text.is_empty() {
                    yield Ok(TurnEvent::Text(response.text.clone()));
                }

                if !response.has_tool_calls() {
                    // An empty closing reply adds nothing to the transcript
                    let messages = if response.text.is_empty() {
                        Vec::new()
                    } else {
                        vec![Message::assistant(response.text)]
                    };
                    let summary = StepSummary {
                        step,
                        tool_calls: Vec::new(),
                        messages,
                    };
                    driver.observer.on_step_finish(&project_id, &summary);
                    yield Ok(TurnEvent::StepFinished(summary));
                    break FinishReason::Stop;
                }

                let calls = response.tool_calls;
                let mut produced = vec![Message {
                    role: Role::Assistant,
                    content: response.text,
                    tool_calls: Some(calls.clone()),
                    tool_call_id: None,
                }];

                for call in &calls {
                    debug!("Tool call {}: {} {}", call.id, call.name, call.arguments);
                    yield Ok(TurnEvent::ToolCall(call.clone()));

                    match driver.tools.invoke(call) {
                        Ok(output) => {
                            let content = match serde_json::to_string(&output) {
                                Ok(content) => content,
                                Err(e) => {
                                    yield Err(e.into());
                                    return;
                                }
                            };
                            produced.push(Message::tool_result(&call.id, content));
                            yield Ok(TurnEvent::ToolResult {
                                call_id: call.id.clone(),
                                name: call.name.clone(),
                                output,
                            });
                        }
                        Err(error) => {
                            warn!("[Project {}] Rejected tool call: {}", project_id, error);
                            produced.push(Message::tool_result(&call.id, format!("Error: {}", error)));
                            yield Ok(TurnEvent::ToolRejected {
                                call_id: call.id.clone(),
                                name: call.name.clone(),
                                error,
                            });
                        }
                    }
                }

                transcript.extend(produced.iter().cloned());

                let summary = StepSummary {
                    step,
                    tool_calls: calls,
                    messages: produced,
                };
                driver.observer.on_step_finish(&project_id, &summary);
                yield Ok(TurnEvent::StepFinished(summary));
            };

            yield Ok(TurnEvent::Finished { reason, usage });
        })
    }
}

/// A turn whose `Finished` event was observed.
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    pub text: String,
    pub tool_results: Vec<ToolOutput>,
    pub rejected: Vec<ToolError>,
    /// Transcript entries produced during the turn (assistant and tool messages)
    pub messages: Vec<Message>,
    pub reason: FinishReason,
    pub usage: Usage,
}

/// Buffers turn events and releases them only once the turn has finished.
#[derive(Debug, Default)]
pub struct TurnCollector {
    text: String,
    tool_results: Vec<ToolOutput>,
    rejected: Vec<ToolError>,
    messages: Vec<Message>,
}

impl TurnCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event; returns the completed turn on `Finished`.
    pub fn push(&mut self, event: &TurnEvent) -> Option<CompletedTurn> {
        match event {
            TurnEvent::Text(text) => {
                if !self.text.is_empty() {
                    self.text.push_str("\n\n");
                }
                self.text.push_str(text);
            }
            TurnEvent::ToolCall(_) => {}
            TurnEvent::ToolResult { output, .. } => self.tool_results.push(output.clone()),
            TurnEvent::ToolRejected { error, .. } => self.rejected.push(error.clone()),
            TurnEvent::StepFinished(step) => self.messages.extend(step.messages.iter().cloned()),
            TurnEvent::Finished { reason, usage } => {
                let collected = std::mem::take(self);
                return Some(CompletedTurn {
                    text: collected.text,
                    tool_results: collected.tool_results,
                    rejected: collected.rejected,
                    messages: collected.messages,
                    reason: *reason,
                    usage: *usage,
                });
            }
        }
        None
    }
}

/// Drain a turn stream to completion.
pub async fn collect_turn(mut stream: TurnStream) -> Result<CompletedTurn> {
    let mut collector = TurnCollector::new();
    while let Some(event) = stream.next().await {
        if let Some(turn) = collector.push(&event?) {
            return Ok(turn);
        }
    }
    anyhow::bail!("Turn ended without completing")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::providers::{LLMResponse, ToolSchema};
    use crate::agent::tools::VariantId;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that replays a fixed script of responses.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<LLMResponse>>>,
        /// When the script runs out, keep returning this response
        repeat: Option<LLMResponse>,
        calls: AtomicUsize,
        last_transcript_len: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<LLMResponse>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                repeat: None,
                calls: AtomicUsize::new(0),
                last_transcript_len: AtomicUsize::new(0),
            }
        }

        fn repeating(response: LLMResponse) -> Self {
            Self {
                repeat: Some(response),
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            messages: &[Message],
            tools: Option<&[ToolSchema]>,
        ) -> Result<LLMResponse> {
            assert_eq!(tools.map(|t| t.len()), Some(5));
            assert_eq!(messages[0].role, Role::System);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_transcript_len
                .store(messages.len(), Ordering::SeqCst);

            if let Some(next) = self.script.lock().unwrap().pop_front() {
                return next;
            }
            self.repeat
                .clone()
                .ok_or_else(|| anyhow::anyhow!("ScriptedProvider exhausted"))
        }
    }

    fn variant_call(id: &str) -> ToolCall {
        ToolCall {
            id: format!("call-{}", id),
            name: "generateVariant".to_string(),
            arguments: json!({
                "id": id,
                "name": format!("Variant {}", id),
                "description": "desc",
                "focusArea": "layout",
                "code": "export default function V() { return <div /> }",
                "rationale": "why"
            })
            .to_string(),
        }
    }

    fn request() -> TurnRequest {
        TurnRequest {
            project_id: "p1".to_string(),
            system_prompt: "system".to_string(),
            messages: vec![Message::user("A pricing page for a SaaS")],
        }
    }

    #[tokio::test]
    async fn five_variants_then_closing_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(LLMResponse::tool_calls(vec![
                variant_call("A"),
                variant_call("B"),
                variant_call("C"),
            ])),
            Ok(LLMResponse::tool_calls(vec![
                variant_call("D"),
                variant_call("E"),
            ])),
            Ok(LLMResponse::text("Here are five directions.")),
        ]));
        let driver = ConversationDriver::new(provider.clone());

        let turn = collect_turn(driver.run_turn(request())).await.unwrap();

        assert_eq!(turn.reason, FinishReason::Stop);
        assert_eq!(turn.text, "Here are five directions.");
        let ids: Vec<VariantId> = turn
            .tool_results
            .iter()
            .map(|r| match r {
                ToolOutput::Variant(v) => v.id,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            ids,
            vec![VariantId::A, VariantId::B, VariantId::C, VariantId::D, VariantId::E]
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        // system + user + (assistant + 3 results) + (assistant + 2 results)
        assert_eq!(provider.last_transcript_len.load(Ordering::SeqCst), 9);
        // two tool steps (1 + 3, 1 + 2) plus the closing assistant message
        assert_eq!(turn.messages.len(), 8);
        assert_eq!(turn.messages[1].role, Role::Tool);
    }

    #[tokio::test]
    async fn empty_closing_reply_adds_no_message() {
        let question = ToolCall {
            id: "call-q".to_string(),
            name: "askQuestion".to_string(),
            arguments: json!({"question": "Who is it for?"}).to_string(),
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(LLMResponse::tool_calls(vec![question])),
            Ok(LLMResponse::text("")),
        ]));
        let driver = ConversationDriver::new(provider);

        let turn = collect_turn(driver.run_turn(request())).await.unwrap();

        assert_eq!(turn.reason, FinishReason::Stop);
        assert!(turn.text.is_empty());
        // assistant tool-use message plus its tool result, nothing after
        assert_eq!(turn.messages.len(), 2);
        assert_eq!(turn.messages.last().unwrap().role, Role::Tool);
        assert!(
            !turn
                .messages
                .iter()
                .any(|m| m.role == Role::Assistant && m.tool_calls.is_none())
        );
    }

    #[tokio::test]
    async fn malformed_call_does_not_abort_turn() {
        let mut bad = variant_call("A");
        bad.arguments = json!({"id": "A", "name": "x", "description": "d", "code": "c", "rationale": "r"})
            .to_string();

        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(LLMResponse::tool_calls(vec![bad, variant_call("B")])),
            Ok(LLMResponse::text("Fixed it.")),
        ]));
        let driver = ConversationDriver::new(provider);

        let mut stream = driver.run_turn(request());
        let mut rejected = Vec::new();
        let mut collector = TurnCollector::new();
        let mut completed = None;
        while let Some(event) = stream.next().await {
            let event = event.unwrap();
            if let TurnEvent::ToolRejected { name, error, .. } = &event {
                rejected.push((name.clone(), error.clone()));
            }
            if let Some(turn) = collector.push(&event) {
                completed = Some(turn);
            }
        }

        let turn = completed.expect("turn should finish");
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "generateVariant");
        assert!(matches!(rejected[0].1, ToolError::Malformed { .. }));
        assert_eq!(turn.tool_results.len(), 1);
        assert_eq!(turn.rejected.len(), 1);
        let error_message = turn
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("call-A"))
            .unwrap();
        assert!(error_message.content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn step_limit_bounds_provider_calls() {
        let provider = Arc::new(ScriptedProvider::repeating(LLMResponse::tool_calls(vec![
            variant_call("A"),
        ])));
        let driver = ConversationDriver::new(provider.clone()).with_max_steps(3);

        let turn = collect_turn(driver.run_turn(request())).await.unwrap();

        assert_eq!(turn.reason, FinishReason::StepLimit);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(turn.tool_results.len(), 3);
    }

    #[tokio::test]
    async fn default_step_bound_is_ten() {
        let provider = Arc::new(ScriptedProvider::repeating(LLMResponse::tool_calls(vec![
            variant_call("A"),
        ])));
        let driver = ConversationDriver::new(provider.clone());

        let turn = collect_turn(driver.run_turn(request())).await.unwrap();
        assert_eq!(turn.reason, FinishReason::StepLimit);
        assert_eq!(provider.calls.load(Ordering::SeqCst), DEFAULT_MAX_STEPS);
    }

    #[tokio::test]
    async fn observer_sees_every_step() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(LLMResponse::tool_calls(vec![variant_call("A")])),
            Ok(LLMResponse::text("done")),
        ]));

        let mut observer = MockStepObserver::new();
        observer
            .expect_on_step_finish()
            .withf(|project_id, step| project_id == "p1" && step.step == 1)
            .times(1)
            .returning(|_, step| assert_eq!(step.tool_calls.len(), 1));
        observer
            .expect_on_step_finish()
            .withf(|_, step| step.step == 2)
            .times(1)
            .returning(|_, step| assert!(step.tool_calls.is_empty()));

        let driver = ConversationDriver::new(provider).with_observer(Arc::new(observer));
        collect_turn(driver.run_turn(request())).await.unwrap();
    }

    #[tokio::test]
    async fn upstream_error_ends_stream() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(LLMResponse::tool_calls(vec![variant_call("A")])),
            Err(anyhow::anyhow!("overloaded")),
        ]));
        let driver = ConversationDriver::new(provider);

        let events: Vec<Result<TurnEvent>> = driver.run_turn(request()).collect().await;
        let last = events.last().unwrap();
        assert!(last.is_err());
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, Ok(TurnEvent::Finished { .. })))
        );

        let provider = Arc::new(ScriptedProvider::new(vec![Err(anyhow::anyhow!("down"))]));
        let err = collect_turn(ConversationDriver::new(provider).run_turn(request()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("down"));
    }

    #[tokio::test]
    async fn stream_is_lazy_and_cancellable() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(LLMResponse::tool_calls(vec![variant_call("A"), variant_call("B")])),
            Ok(LLMResponse::text("done")),
        ]));
        let driver = ConversationDriver::new(provider.clone());

        let stream = driver.run_turn(request());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let mut stream = stream;
        let mut collector = TurnCollector::new();
        for _ in 0..2 {
            let event = stream.next().await.unwrap().unwrap();
            assert!(collector.push(&event).is_none());
        }
        drop(stream);

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn collector_joins_text_across_steps() {
        let mut collector = TurnCollector::new();
        collector.push(&TurnEvent::Text("Generating now.".to_string()));
        collector.push(&TurnEvent::Text("All done.".to_string()));
        let turn = collector
            .push(&TurnEvent::Finished {
                reason: FinishReason::Stop,
                usage: Usage::default(),
            })
            .unwrap();
        assert_eq!(turn.text, "Generating now.\n\nAll done.");
    }
}
