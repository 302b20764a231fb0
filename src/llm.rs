use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Where solution text comes from when a caller asks to type "the current
/// solution". Implementations may call out to a remote model; `None` means
/// there is nothing to type right now.
pub trait SolutionSource {
    fn solution_text(&self) -> Result<Option<String>>;
}

/// System prompt for an LLM that writes solution code for a problem
/// statement. The code is typed into a focused editor verbatim, so the
/// output must be paste-ready: no fences, no commentary mixed in.
pub const SOLUTION_SYSTEM_PROMPT: &str = r#"You write solution code for programming problems.

Goal
- Given a problem statement, produce a complete, correct solution.

Output format (STRICT)
- Output ONLY valid JSON. No markdown, no surrounding prose, no code fences.
- Output MUST be an object with exactly these keys:
  - "language": string
  - "code": string
  - "notes": string
- No additional keys are allowed.

Hard constraints
- `code` is the full solution source, ready to paste into an editor as-is.
- `code` MUST NOT be wrapped in markdown code fences.
- Use spaces for indentation, never tabs.
- Use the language the problem statement asks for; if it names none, use Python.
- `notes` is at most two sentences on the approach; it may be empty.

Quality guidance
- Prefer a straightforward, readable solution over a clever one.
- Handle the edge cases the statement calls out.
"#;

/// JSON Schema for `SOLUTION_SYSTEM_PROMPT` output.
///
/// Many LLM APIs can enforce this schema via structured outputs.
pub const SOLUTION_JSON_SCHEMA: &str = r#"{
  "type": "object",
  "additionalProperties": false,
  "required": ["language", "code", "notes"],
  "properties": {
    "language": { "type": "string" },
    "code": { "type": "string" },
    "notes": { "type": "string" }
  }
}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSolution {
    pub language: String,
    pub code: String,
    pub notes: String,
}

/// Remove one wrapping markdown fence if the model added it anyway.
/// Anything that is not a complete fence is returned trimmed but untouched.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let rest = match trimmed.strip_prefix("```") {
        Some(rest) => rest,
        None => return trimmed,
    };
    // The opening fence may carry a language tag; the body starts on the
    // next line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => return trimmed,
    };
    match body.strip_suffix("```") {
        Some(inner) => inner.trim_end(),
        None => trimmed,
    }
}

pub fn validate_generated_solution(solution: &GeneratedSolution) -> Result<()> {
    ensure!(
        !solution.language.trim().is_empty(),
        "language must not be empty"
    );
    ensure!(
        !solution.code.trim().is_empty(),
        "solution code must not be empty"
    );
    ensure!(
        !strip_code_fence(&solution.code).trim().is_empty(),
        "solution code must not be an empty fence"
    );
    Ok(())
}

#[cfg(feature = "llm")]
pub mod openrouter {
    use super::*;

    use anyhow::{Context, Result};
    use async_openai::{
        config::OpenAIConfig,
        types::chat::{
            ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
            CreateChatCompletionRequestArgs, CreateChatCompletionResponse, ResponseFormat,
            ResponseFormatJsonSchema,
        },
        Client,
    };
    use serde::de::DeserializeOwned;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::time::sleep;

    pub const DEFAULT_MODEL: &str = "google/gemini-3-flash-preview";

    const OPENROUTER_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
    const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

    #[derive(Debug, Clone)]
    pub struct SolutionClient {
        client: Client<OpenAIConfig>,
        model: String,
        response_format: ResponseFormat,
    }

    impl SolutionClient {
        pub fn from_env() -> Result<Self> {
            dotenvy::dotenv().ok();
            let api_key = std::env::var(OPENROUTER_API_KEY_ENV)
                .with_context(|| format!("{OPENROUTER_API_KEY_ENV} is not set"))?;
            Self::new(api_key)
        }

        pub fn new(api_key: impl Into<String>) -> Result<Self> {
            let schema: Value = serde_json::from_str(SOLUTION_JSON_SCHEMA)
                .context("SOLUTION_JSON_SCHEMA must be valid JSON")?;

            let config = OpenAIConfig::new()
                .with_api_key(api_key.into())
                .with_api_base(OPENROUTER_API_BASE);

            // OpenRouter encourages these headers; set them to your app.
            let config = config
                .with_header("HTTP-Referer", "https://github.com")
                .context("failed to set HTTP-Referer header")?;
            let config = config
                .with_header("X-Title", "retype")
                .context("failed to set X-Title header")?;

            let response_format = ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    name: "generated_solution".to_string(),
                    description: None,
                    schema: Some(schema),
                    strict: Some(true),
                },
            };

            Ok(Self {
                client: Client::with_config(config),
                model: DEFAULT_MODEL.to_string(),
                response_format,
            })
        }

        pub fn with_model(mut self, model: impl Into<String>) -> Self {
            self.model = model.into();
            self
        }

        /// Solve `problem` and return the structured solution, retrying once
        /// after a pause on transient failures.
        pub async fn generate_solution(&self, problem: &str) -> Result<GeneratedSolution> {
            let retry_delays = [Duration::from_secs(0), Duration::from_secs(10)];

            let mut attempt = 0usize;
            loop {
                match self.generate_solution_once(problem).await {
                    Ok(solution) => return Ok(solution),
                    Err(err) => {
                        if attempt >= retry_delays.len() {
                            return Err(err).context("solution request failed after retries");
                        }

                        let delay = retry_delays[attempt];
                        attempt += 1;
                        if delay > Duration::from_secs(0) {
                            sleep(delay).await;
                        }
                    }
                }
            }
        }

        async fn generate_solution_once(&self, problem: &str) -> Result<GeneratedSolution> {
            let request = CreateChatCompletionRequestArgs::default()
                .model(self.model.as_str())
                .messages([
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(SOLUTION_SYSTEM_PROMPT)
                        .build()?
                        .into(),
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(build_user_prompt(problem))
                        .build()?
                        .into(),
                ])
                .response_format(self.response_format.clone())
                .temperature(0.0)
                .build()
                .context("failed to build OpenRouter request")?;

            let response = self
                .client
                .chat()
                .create(request)
                .await
                .context("OpenRouter chat completion request failed")?;

            let mut solution: GeneratedSolution =
                parse_chat_completion_json(&response).context("failed to parse structured output")?;

            solution.code = strip_code_fence(&solution.code).to_string();
            validate_generated_solution(&solution).context("model output failed validation")?;

            Ok(solution)
        }
    }

    fn parse_chat_completion_json<T: DeserializeOwned>(
        response: &CreateChatCompletionResponse,
    ) -> Result<T> {
        let content = response
            .choices
            .get(0)
            .and_then(|c| c.message.content.as_deref())
            .context("missing choices[0].message.content")?;

        serde_json::from_str::<T>(content.trim()).context("assistant content is not valid JSON")
    }

    fn build_user_prompt(problem: &str) -> String {
        format!("Problem statement:\n{problem}\n\nReturn ONLY the JSON object.")
    }
}

#[cfg(not(feature = "llm"))]
pub mod openrouter {
    use super::*;

    use anyhow::{anyhow, Result};

    pub const DEFAULT_MODEL: &str = "google/gemini-3-flash-preview";

    #[derive(Debug, Clone)]
    pub struct SolutionClient;

    impl SolutionClient {
        pub fn from_env() -> Result<Self> {
            Err(anyhow!(
                "LLM support is disabled (build with --features llm)"
            ))
        }

        pub fn new(_api_key: impl Into<String>) -> Result<Self> {
            Err(anyhow!(
                "LLM support is disabled (build with --features llm)"
            ))
        }

        pub fn with_model(self, _model: impl Into<String>) -> Self {
            self
        }

        pub async fn generate_solution(&self, _problem: &str) -> Result<GeneratedSolution> {
            Err(anyhow!(
                "LLM support is disabled (build with --features llm)"
            ))
        }
    }
}
