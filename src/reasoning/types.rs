// Reasoning decisions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What the agent decided to do with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Conversation,
    ToolCall,
    Clarify,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Conversation => "conversation",
            ActionType::ToolCall => "tool_call",
            ActionType::Clarify => "clarify",
        }
    }

    /// Case-insensitive parse of an action name
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "conversation" => Some(ActionType::Conversation),
            "tool_call" => Some(ActionType::ToolCall),
            "clarify" => Some(ActionType::Clarify),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningResult {
    pub action: ActionType,
    pub tool_name: Option<String>,
    pub arguments: Map<String, Value>,
    pub reasoning: String,
    /// 0.0 to 1.0
    pub confidence: f64,
    /// Seconds
    pub processing_time: f64,
    pub raw_response: String,
    pub requires_clarification: bool,
    pub clarification_question: String,
    pub assistant_message: String,
}

impl ReasoningResult {
    fn base(action: ActionType, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            action,
            tool_name: None,
            arguments: Map::new(),
            reasoning: reasoning.into(),
            confidence,
            processing_time: 0.0,
            raw_response: String::new(),
            requires_clarification: false,
            clarification_question: String::new(),
            assistant_message: String::new(),
        }
    }

    pub fn conversation(reasoning: impl Into<String>, confidence: f64) -> Self {
        Self::base(ActionType::Conversation, reasoning, confidence)
    }

    pub fn tool_call(
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
        reasoning: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            arguments,
            ..Self::base(ActionType::ToolCall, reasoning, confidence)
        }
    }

    pub fn clarify(
        question: impl Into<String>,
        reasoning: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            requires_clarification: true,
            clarification_question: question.into(),
            ..Self::base(ActionType::Clarify, reasoning, confidence)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.assistant_message = message.into();
        self
    }

    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = raw.into();
        self
    }
}
