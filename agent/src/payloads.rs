//! Payload types flowing between the four agents, and the parsing helpers
//! for model responses.

use serde::{Deserialize, Serialize};

/// What the submit CLI sends to the preprocessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub request: String,
}

/// Preprocessor output: the normalized task and its target language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task: String,
    pub language: String,
}

/// What happened when the generated code ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub execution_time_ms: u64,
}

/// Codegen output: the verified program and its run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedProgram {
    pub task: String,
    pub language: String,
    pub code: String,
    pub run: ExecutionSummary,
}

/// Explainer output. `code` is absent when an upstream failure or rejection
/// was projected into an apology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub explanation: String,
}

/// The terminal answer the refiner prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub answer: String,
}

/// Parse the classifier response, expected to contain a `language|task`
/// line. Falls back to the raw request as the task when the model leaves it
/// empty.
pub fn parse_task_spec(request: &str, response: &str) -> Result<TaskSpec, String> {
    let (language, task) = response
        .lines()
        .find_map(|line| line.split_once('|'))
        .ok_or_else(|| format!("classifier response has no `language|task` line: {response}"))?;
    let language = language.trim().to_lowercase();
    if language.is_empty() {
        return Err("classifier returned an empty language".to_string());
    }
    let task = task.trim();
    Ok(TaskSpec {
        task: if task.is_empty() {
            request.to_string()
        } else {
            task.to_string()
        },
        language,
    })
}

/// Extract the program from a model response: the first fenced block when
/// there is one, otherwise the whole trimmed response.
pub fn extract_code(response: &str) -> String {
    if let Some(open) = response.find("```") {
        let after_fence = &response[open + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(close) = body.find("```") {
            return body[..close].trim_end().to_string();
        }
    }
    response.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_spec_parses_a_pipe_line() {
        let spec = parse_task_spec("sum a list", "python|sum the numbers in a list").unwrap();
        assert_eq!(spec.language, "python");
        assert_eq!(spec.task, "sum the numbers in a list");
    }

    #[test]
    fn task_spec_falls_back_to_the_request_for_an_empty_task() {
        let spec = parse_task_spec("sum a list", "Python| ").unwrap();
        assert_eq!(spec.language, "python");
        assert_eq!(spec.task, "sum a list");
    }

    #[test]
    fn task_spec_rejects_a_response_without_a_pipe() {
        assert!(parse_task_spec("x", "no separator here").is_err());
    }

    #[test]
    fn code_extraction_prefers_the_fenced_block() {
        let response = "Here you go:\n```python\nprint(1 + 1)\n```\nEnjoy.";
        assert_eq!(extract_code(response), "print(1 + 1)");
    }

    #[test]
    fn code_extraction_takes_the_whole_text_without_fences() {
        assert_eq!(extract_code("  print(2)\n"), "print(2)");
    }

    #[test]
    fn code_extraction_handles_unterminated_fences() {
        let response = "```python\nprint(3)";
        assert_eq!(extract_code(response), "print(3)");
    }
}
