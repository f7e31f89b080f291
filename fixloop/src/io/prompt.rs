//! Prompt rendering for the generator command.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::io::generator::GenerationRequest;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

/// Characters of each failure stream kept in a repair prompt (the tail).
pub const MAX_FAILURE_CHARS: usize = 4000;

/// Failure context as shown to the generator.
#[derive(Debug, Clone, Serialize)]
struct FailureView {
    stdout: String,
    stderr: String,
    exception_message: Option<String>,
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("generate", GENERATE_TEMPLATE)
            .context("load generate template")?;
        env.add_template("repair", REPAIR_TEMPLATE)
            .context("load repair template")?;
        Ok(Self { env })
    }

    /// Render the prompt for `request`: a fresh generation when there is no
    /// code yet, a repair otherwise.
    pub fn render(&self, request: &GenerationRequest) -> Result<String> {
        let query = request.query.trim();
        if request.code.trim().is_empty() {
            debug!("rendering generate prompt");
            let template = self.env.get_template("generate")?;
            return Ok(template.render(context! { query => query })?);
        }

        debug!(has_failure = request.last_failure.is_some(), "rendering repair prompt");
        let failure = request.last_failure.as_ref().map(|failure| FailureView {
            stdout: tail_chars(failure.stdout.trim_end(), MAX_FAILURE_CHARS),
            stderr: tail_chars(failure.stderr.trim_end(), MAX_FAILURE_CHARS),
            exception_message: failure.exception_message.clone(),
        });
        let template = self.env.get_template("repair")?;
        let rendered = template.render(context! {
            query => query,
            code => request.code.trim_end(),
            failure => failure,
        })?;
        Ok(rendered)
    }
}

/// Keep the last `max` characters, marking the cut.
fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let skip = count - max;
    let tail: String = text.chars().skip(skip).collect();
    format!("[{skip} characters truncated]\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::FailureContext;

    fn request(code: &str, failure: Option<FailureContext>) -> GenerationRequest {
        GenerationRequest {
            query: "print the first ten primes".to_string(),
            code: code.to_string(),
            last_failure: failure,
        }
    }

    #[test]
    fn empty_code_renders_generate_prompt() {
        let engine = PromptEngine::new().expect("engine");
        let prompt = engine.render(&request("  ", None)).expect("render");
        assert!(prompt.contains("print the first ten primes"));
        assert!(prompt.contains("Write a complete, executable Python program"));
        assert!(!prompt.contains("### Current Code"));
    }

    #[test]
    fn repair_prompt_carries_failure_context() {
        let engine = PromptEngine::new().expect("engine");
        let failure = FailureContext {
            stdout: "partial".to_string(),
            stderr: "Traceback".to_string(),
            exception_message: Some("division by zero".to_string()),
        };
        let prompt = engine
            .render(&request("print(1/0)", Some(failure)))
            .expect("render");

        let request_pos = prompt.find("### Original Request").expect("request");
        let failure_pos = prompt.find("### Last Execution").expect("failure");
        let code_pos = prompt.find("### Current Code").expect("code");
        assert!(request_pos < failure_pos);
        assert!(failure_pos < code_pos);
        assert!(prompt.contains("exception: division by zero"));
        assert!(prompt.contains("print(1/0)"));
        assert!(prompt.contains("partial"));
    }

    #[test]
    fn repair_without_failure_omits_section() {
        let engine = PromptEngine::new().expect("engine");
        let prompt = engine.render(&request("print(1)", None)).expect("render");
        assert!(prompt.contains("### Current Code"));
        assert!(!prompt.contains("### Last Execution"));
    }

    #[test]
    fn long_failure_output_keeps_the_tail() {
        let text = format!("{}END", "x".repeat(MAX_FAILURE_CHARS));
        let tail = tail_chars(&text, MAX_FAILURE_CHARS);
        assert!(tail.starts_with("[3 characters truncated]\n"));
        assert!(tail.ends_with("END"));
        assert_eq!(tail_chars("short", 10), "short");
    }
}
