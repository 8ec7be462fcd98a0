// Turns raw service responses into the text we print.

use crate::error::{CliError, Result};
use crate::types::{Candidate, Content, GenerateResponse, Part};

/// Text of the first candidate, its text parts joined in order.
///
/// A response with no candidates means the prompt was blocked; the block
/// reason is reported when the service gives one.
pub fn response_text(response: &GenerateResponse) -> Result<String> {
    let candidate = match response.candidates.first() {
        Some(c) => c,
        None => {
            let reason = response
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.clone())
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(CliError::Blocked(reason));
        }
    };

    let text: String = candidate
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect();

    if text.is_empty() {
        if let Some(reason) = candidate.finish_reason.as_deref().filter(|r| *r != "STOP") {
            return Err(CliError::Blocked(reason.to_string()));
        }
    }
    Ok(text)
}

/// Collects the chunks of a streamed response.
#[derive(Debug, Default)]
pub struct Accumulator {
    text: String,
    finish_reason: Option<String>,
    last: GenerateResponse,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk in, returning the text it added.
    pub fn push(&mut self, chunk: GenerateResponse) -> String {
        let mut added = String::new();
        if let Some(candidate) = chunk.candidates.first() {
            for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
                if let Some(t) = &part.text {
                    added.push_str(t);
                }
            }
            if candidate.finish_reason.is_some() {
                self.finish_reason = candidate.finish_reason.clone();
            }
        }
        self.text.push_str(&added);
        self.last = chunk;
        added
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The whole stream as one response. Usage and feedback come from the
    /// last chunk, which is where the service reports them.
    pub fn finish(self) -> GenerateResponse {
        if self.text.is_empty() && self.last.candidates.is_empty() {
            return self.last;
        }
        GenerateResponse {
            candidates: vec![Candidate {
                content: Some(Content::model(vec![Part::text(self.text)])),
                finish_reason: self.finish_reason,
            }],
            prompt_feedback: self.last.prompt_feedback,
            usage_metadata: self.last.usage_metadata,
        }
    }
}
