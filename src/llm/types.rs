use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A single generation call: the assembled prompt plus an optional system
/// instruction. How the instruction is transmitted is provider-specific.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_instruction: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_instruction: None,
        }
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Reject blank prompts before any network call is made.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.prompt.trim().is_empty() {
            return Err(RagError::EmptyInput("prompt cannot be empty".to_string()));
        }
        Ok(())
    }

    /// The system instruction, trimmed, when it carries any content.
    pub fn system_trimmed(&self) -> Option<&str> {
        self.system_instruction
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_prompts_are_rejected() {
        assert!(GenerationRequest::new("   \n ").validate().is_err());
        assert!(GenerationRequest::new("hello").validate().is_ok());
    }

    #[test]
    fn whitespace_system_instruction_counts_as_absent() {
        let request = GenerationRequest::new("q").with_system("  \t ");
        assert_eq!(request.system_trimmed(), None);

        let request = GenerationRequest::new("q").with_system("  be brief ");
        assert_eq!(request.system_trimmed(), Some("be brief"));
    }
}
