//! Scripted text generator for unit tests.

use crate::batch::parse_translations;
use crate::llm::{GenerationRequest, TextGenerator};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// What the generator does on one call
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer every marker with `EN(<source>)`
    Echo,
    /// Like `Echo` but leave out the given indices
    EchoExcept(Vec<usize>),
    /// Return this raw text
    Text(String),
    /// Fail the call
    Fail(String),
}

/// Plays back replies in order, then echoes once the script runs out
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<GenerationRequest>>,
    credential: bool,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            credential: true,
        }
    }

    pub fn without_credential(mut self) -> Self {
        self.credential = false;
        self
    }

    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().expect("lock").clone()
    }
}

/// Echo the tagged texts found after the prompt's "Text to translate:" line
fn echo(prompt: &str, skip: &[usize]) -> String {
    let batch_text = prompt
        .rsplit_once("Text to translate:\n")
        .map(|(_, tail)| tail)
        .unwrap_or_default();

    parse_translations(batch_text)
        .into_iter()
        .filter(|(i, _)| !skip.contains(i))
        .map(|(i, text)| format!("【{}】EN({})", i, text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.lock().expect("lock").push(request.clone());
        let reply = self
            .replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Reply::Echo);

        match reply {
            Reply::Echo => Ok(echo(&request.prompt, &[])),
            Reply::EchoExcept(skip) => Ok(echo(&request.prompt, &skip)),
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(anyhow::anyhow!(message)),
        }
    }

    fn has_credential(&self, _model: &str, api_key: Option<&str>) -> bool {
        self.credential || api_key.is_some()
    }
}
