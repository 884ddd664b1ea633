use crate::analysis::{build_prompt, parse_analysis, ChartAnalysis, ChartAnalysisProvider};
use crate::models::Candle;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

/// Chart analysis backed by the OpenAI chat completions API
pub struct OpenAiProvider {
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChartAnalysisProvider for OpenAiProvider {
    async fn analyze(&self, symbol: &str, candles: &[Candle]) -> Result<ChartAnalysis> {
        let request = ChatRequest {
            model: MODEL.to_string(),
            max_tokens: MAX_TOKENS,
            temperature: 0.3,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You are an expert trading technical analyst. Base your analysis \
                              only on the provided data and respond with valid JSON only."
                        .to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: build_prompt(symbol, candles),
                },
            ],
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("OpenAI request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("unparseable OpenAI response envelope")?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .context("OpenAI response had no choices")?;

        parse_analysis(content, self.name())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
