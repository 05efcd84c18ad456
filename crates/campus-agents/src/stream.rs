//! Per-request event stream: `connected`, thinking phases, tool lifecycle
//! with per-call progress, narration, then the chunked answer. `error` may end it at any point.

use std::time::Duration;

use campus_config::StreamingConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::executor::ToolExecutionResult;
use crate::tools::{ToolCall, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingPhase {
    SecurityCheck,
    IntentAnalysis,
    ContextBuilding,
    ModelPrep,
}

impl ThinkingPhase {
    pub const ALL: [ThinkingPhase; 4] = [
        Self::SecurityCheck,
        Self::IntentAnalysis,
        Self::ContextBuilding,
        Self::ModelPrep,
    ];

    /// 1-based progress index.
    pub fn step(&self) -> u32 {
        match self {
            Self::SecurityCheck => 1,
            Self::IntentAnalysis => 2,
            Self::ContextBuilding => 3,
            Self::ModelPrep => 4,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::SecurityCheck => "正在进行安全检查",
            Self::IntentAnalysis => "正在分析问题意图",
            Self::ContextBuilding => "正在构建上下文",
            Self::ModelPrep => "正在准备模型调用",
        }
    }
}

/// One outbound event. Serializes as `{"type": ..., "payload": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Connected {
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },
    Thinking {
        phase: ThinkingPhase,
        step: u32,
        total: u32,
        message: String,
    },
    ToolCallStart {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    /// Position of the open call within this round's tool calls.
    Progress {
        step: u32,
        total: u32,
        message: String,
    },
    ToolCallComplete {
        call_id: String,
        tool_name: String,
        result: Option<ToolOutput>,
        duration_ms: u64,
    },
    ToolCallError {
        call_id: String,
        tool_name: String,
        error: String,
        duration_ms: u64,
    },
    ToolNarration {
        call_id: String,
        tool_name: String,
        narration: String,
    },
    AnswerStart {},
    AnswerChunk {
        index: usize,
        content: String,
    },
    AnswerComplete {
        content: String,
        tool_count: usize,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Thinking { .. } => "thinking",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::Progress { .. } => "progress",
            Self::ToolCallComplete { .. } => "tool_call_complete",
            Self::ToolCallError { .. } => "tool_call_error",
            Self::ToolNarration { .. } => "tool_narration",
            Self::AnswerStart { .. } => "answer_start",
            Self::AnswerChunk { .. } => "answer_chunk",
            Self::AnswerComplete { .. } => "answer_complete",
            Self::Error { .. } => "error",
        }
    }

    /// The JSON payload without the type tag.
    pub fn payload(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => map
                .remove("payload")
                .unwrap_or_else(|| serde_json::json!({})),
            _ => serde_json::json!({}),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AnswerComplete { .. } | Self::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Setup,
    Connected,
    Thinking,
    Tools,
    Answering,
    Finished,
}

/// Enforces event ordering for one request and stops writing once the
/// transport is gone. Detached coordinators accept every call but emit
/// nothing; the non-streaming path uses them.
pub struct StreamCoordinator {
    sender: Option<mpsc::Sender<StreamEvent>>,
    phase: Phase,
    open_call: Option<String>,
    narratable: Option<String>,
    chunk_chars: usize,
    chunk_delay: Duration,
    thinking_delay: Duration,
}

impl StreamCoordinator {
    pub fn new(sender: mpsc::Sender<StreamEvent>, config: &StreamingConfig) -> Self {
        Self::build(Some(sender), config)
    }

    pub fn detached(config: &StreamingConfig) -> Self {
        Self::build(None, config)
    }

    fn build(sender: Option<mpsc::Sender<StreamEvent>>, config: &StreamingConfig) -> Self {
        Self {
            sender,
            phase: Phase::Setup,
            open_call: None,
            narratable: None,
            chunk_chars: config.chunk_chars.max(1),
            chunk_delay: Duration::from_millis(config.chunk_delay_ms),
            thinking_delay: Duration::from_millis(config.thinking_step_delay_ms),
        }
    }

    /// Whether events actually go anywhere.
    pub fn is_streaming(&self) -> bool {
        self.sender.is_some()
    }

    /// The caller went away; further work is best effort.
    pub fn is_cancelled(&self) -> bool {
        self.sender.as_ref().is_some_and(|tx| tx.is_closed())
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    async fn emit(&mut self, event: StreamEvent) -> bool {
        if self.phase == Phase::Finished {
            debug!(event = event.event_name(), "dropping event after terminal event");
            return false;
        }
        if event.is_terminal() {
            self.phase = Phase::Finished;
        }
        let Some(sender) = &self.sender else {
            return true;
        };
        if sender.is_closed() {
            return false;
        }
        match sender.send(event).await {
            Ok(()) => true,
            Err(_) => {
                debug!("stream receiver dropped");
                false
            }
        }
    }

    pub async fn connected(&mut self, conversation_id: &str) -> bool {
        if self.phase != Phase::Setup {
            return false;
        }
        self.phase = Phase::Connected;
        self.emit(StreamEvent::Connected {
            conversation_id: conversation_id.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    pub async fn thinking(&mut self, phase: ThinkingPhase) -> bool {
        if self.phase > Phase::Thinking {
            warn!(?phase, "thinking phase after tool work started; ignored");
            return false;
        }
        self.phase = Phase::Thinking;
        let sent = self
            .emit(StreamEvent::Thinking {
                phase,
                step: phase.step(),
                total: ThinkingPhase::ALL.len() as u32,
                message: phase.message().to_string(),
            })
            .await;
        if sent && self.is_streaming() && !self.thinking_delay.is_zero() {
            tokio::time::sleep(self.thinking_delay).await;
        }
        sent
    }

    pub async fn tool_start(&mut self, call: &ToolCall) -> bool {
        if self.phase >= Phase::Answering {
            warn!(tool = %call.name, "tool start after answer began; ignored");
            return false;
        }
        if let Some(open) = &self.open_call {
            warn!(open = %open, tool = %call.name, "tool start while another call is open; ignored");
            return false;
        }
        self.phase = Phase::Tools;
        self.open_call = Some(call.id.clone());
        self.narratable = None;
        let arguments = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));
        self.emit(StreamEvent::ToolCallStart {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments,
        })
        .await
    }

    /// Only while a call is open.
    pub async fn progress(&mut self, step: u32, total: u32, message: impl Into<String>) -> bool {
        if self.phase != Phase::Tools || self.open_call.is_none() {
            return false;
        }
        self.emit(StreamEvent::Progress {
            step,
            total,
            message: message.into(),
        })
        .await
    }

    /// `tool_call_complete` or `tool_call_error`, whichever `result` is.
    pub async fn tool_finished(&mut self, result: &ToolExecutionResult) -> bool {
        if self.open_call.as_deref() != Some(result.call_id.as_str()) {
            warn!(call = %result.call_id, "tool finish without matching start; ignored");
            return false;
        }
        self.open_call = None;
        let event = if result.success {
            self.narratable = Some(result.call_id.clone());
            StreamEvent::ToolCallComplete {
                call_id: result.call_id.clone(),
                tool_name: result.tool_name.clone(),
                result: result.result.clone(),
                duration_ms: result.duration_ms,
            }
        } else {
            StreamEvent::ToolCallError {
                call_id: result.call_id.clone(),
                tool_name: result.tool_name.clone(),
                error: result.error.clone().unwrap_or_default(),
                duration_ms: result.duration_ms,
            }
        };
        self.emit(event).await
    }

    /// Only after that call completed, and before the next one starts.
    pub async fn tool_narration(&mut self, result: &ToolExecutionResult, narration: String) -> bool {
        if self.narratable.as_deref() != Some(result.call_id.as_str()) {
            return false;
        }
        self.narratable = None;
        self.emit(StreamEvent::ToolNarration {
            call_id: result.call_id.clone(),
            tool_name: result.tool_name.clone(),
            narration,
        })
        .await
    }

    /// `answer_start`, paced `answer_chunk`s, `answer_complete`.
    pub async fn answer(&mut self, text: &str, tool_count: usize) -> bool {
        if self.phase >= Phase::Answering {
            return false;
        }
        self.phase = Phase::Answering;
        self.open_call = None;
        self.narratable = None;
        if !self.emit(StreamEvent::AnswerStart {}).await {
            return false;
        }

        if self.is_streaming() {
            let chars: Vec<char> = text.chars().collect();
            for (index, chunk) in chars.chunks(self.chunk_chars).enumerate() {
                if self.is_cancelled() {
                    debug!(index, "client disconnected mid-answer");
                    return false;
                }
                let sent = self
                    .emit(StreamEvent::AnswerChunk {
                        index,
                        content: chunk.iter().collect(),
                    })
                    .await;
                if !sent {
                    return false;
                }
                if !self.chunk_delay.is_zero() {
                    tokio::time::sleep(self.chunk_delay).await;
                }
            }
        }

        self.emit(StreamEvent::AnswerComplete {
            content: text.to_string(),
            tool_count,
        })
        .await
    }

    pub async fn error(&mut self, message: impl Into<String>) -> bool {
        self.emit(StreamEvent::Error {
            message: message.into(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StreamingConfig {
        StreamingConfig {
            chunk_chars: 2,
            chunk_delay_ms: 0,
            thinking_step_delay_ms: 0,
            channel_buffer: 64,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn result(call: &ToolCall, success: bool) -> ToolExecutionResult {
        ToolExecutionResult {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: serde_json::json!({}),
            result: success.then(|| ToolOutput::success("ok", serde_json::json!({}))),
            success,
            duration_ms: 1,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[tokio::test]
    async fn full_sequence_is_ordered() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut stream = StreamCoordinator::new(tx, &config());
        let a = ToolCall::new("any_query", "{}");
        let b = ToolCall::new("render_component", "{}");

        stream.connected("c1").await;
        for phase in ThinkingPhase::ALL {
            stream.thinking(phase).await;
        }
        assert!(!stream.progress(1, 2, "too early").await);
        stream.tool_start(&a).await;
        assert!(!stream.tool_start(&b).await, "second start while a is open");
        stream.progress(1, 2, "正在执行 any_query").await;
        stream.tool_finished(&result(&a, true)).await;
        stream.tool_narration(&result(&a, true), "三名教师".to_string()).await;
        stream.tool_start(&b).await;
        stream.tool_finished(&result(&b, false)).await;
        assert!(!stream.tool_narration(&result(&b, false), "x".to_string()).await);
        stream.answer("共有三名", 2).await;

        let events = drain(&mut rx);
        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            vec![
                "connected",
                "thinking",
                "thinking",
                "thinking",
                "thinking",
                "tool_call_start",
                "progress",
                "tool_call_complete",
                "tool_narration",
                "tool_call_start",
                "tool_call_error",
                "answer_start",
                "answer_chunk",
                "answer_chunk",
                "answer_complete",
            ]
        );
    }

    #[tokio::test]
    async fn nothing_after_terminal_event() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut stream = StreamCoordinator::new(tx, &config());
        stream.connected("c1").await;
        stream.error("denied").await;
        assert!(!stream.answer("late", 0).await);
        assert!(!stream.error("again").await);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(stream.is_finished());
    }

    #[tokio::test]
    async fn tool_events_rejected_after_answer_start() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut stream = StreamCoordinator::new(tx, &config());
        stream.answer("done", 0).await;
        assert!(!stream.tool_start(&ToolCall::new("any_query", "{}")).await);
        assert!(drain(&mut rx).iter().all(|e| e.event_name() != "tool_call_start"));
    }

    #[tokio::test]
    async fn closed_transport_stops_writes() {
        let (tx, rx) = mpsc::channel(16);
        let mut stream = StreamCoordinator::new(tx, &config());
        drop(rx);
        assert!(stream.is_cancelled());
        assert!(!stream.connected("c1").await);
        assert!(!stream.answer("anyone?", 0).await);
    }

    #[tokio::test]
    async fn detached_accepts_without_emitting() {
        let mut stream = StreamCoordinator::detached(&config());
        assert!(stream.connected("c1").await);
        assert!(stream.answer("hello", 0).await);
        assert!(!stream.is_streaming());
        assert!(!stream.is_cancelled());
    }

    #[test]
    fn wire_shape_is_type_and_payload() {
        let event = StreamEvent::ToolNarration {
            call_id: "call_1".to_string(),
            tool_name: "any_query".to_string(),
            narration: "共 3 名".to_string(),
        };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "tool_narration");
        assert_eq!(wire["payload"]["toolName"], "any_query");
        assert_eq!(event.payload()["narration"], "共 3 名");
    }
}
