//! Ollama LLM integration for entity detection
//!
//! This module provides an `EntityProvider` backed by a local Ollama model,
//! with support for health checks and repair of loosely formatted responses.

use crate::external::{EntityProvider, ExternalEntity};
use crate::prompt_loader::PromptLoader;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub enabled: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            timeout_seconds: 30,
            enabled: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    #[serde(default)]
    pub entities: Vec<LlmDetectedEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmDetectedEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.8
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    config: OllamaConfig,
    prompt_loader: PromptLoader,
    prompt_template: String,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig, prompt_template: Option<&str>) -> Result<Self> {
        Self::with_prompt_loader(config, PromptLoader::new()?, prompt_template)
    }

    pub fn with_prompt_loader(
        config: OllamaConfig,
        prompt_loader: PromptLoader,
        prompt_template: Option<&str>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let template = prompt_loader.load_prompt(prompt_template)?;

        Ok(Self {
            client,
            config,
            prompt_loader,
            prompt_template: template,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn extract_entities(&self, text: &str) -> Result<Vec<ExternalEntity>> {
        if !self.config.enabled {
            debug!("Ollama client is disabled, returning empty entities");
            return Ok(vec![]);
        }

        debug!("Sending text to Ollama for entity detection: {} characters", text.len());

        let prompt = self.prompt_loader.format_prompt(&self.prompt_template, text);
        let response = self.call_ollama(&prompt).await?;

        self.parse_llm_response(&response, text)
    }

    async fn call_ollama(&self, prompt: &str) -> Result<String> {
        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: 0.0,
                top_p: 0.1,
                num_predict: 500,
            },
        };

        debug!("Making request to Ollama: {}/api/generate", self.config.endpoint);

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.endpoint))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Ollama request failed with status {}: {}", status, error_text);
            return Err(anyhow::anyhow!("Ollama request failed: {} - {}", status, error_text));
        }

        let ollama_response: OllamaResponse = response.json().await?;

        if !ollama_response.done {
            warn!("Received incomplete response from Ollama");
        }

        debug!("Received response from Ollama: {} characters", ollama_response.response.len());
        Ok(ollama_response.response)
    }

    fn parse_llm_response(&self, response: &str, original_text: &str) -> Result<Vec<ExternalEntity>> {
        let json_str = self.extract_json_from_response(response)?;

        debug!("Parsing JSON response: {}", json_str);

        let llm_response: LlmResponse = serde_json::from_str(&json_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse LLM JSON response: {}", e))?;

        let mut entities = Vec::new();

        for llm_entity in llm_response.entities {
            if llm_entity.value.trim().is_empty() {
                continue;
            }

            let reported = original_text.get(llm_entity.start..llm_entity.end);
            let (start, end) = if llm_entity.start < llm_entity.end && reported == Some(llm_entity.value.as_str()) {
                (llm_entity.start, llm_entity.end)
            } else {
                if llm_entity.start != 0 || llm_entity.end != 0 {
                    warn!(
                        "Entity offsets {}-{} do not match '{}', searching the text",
                        llm_entity.start, llm_entity.end, llm_entity.value
                    );
                }
                match self.find_entity_position(original_text, &llm_entity.value) {
                    Some(span) => span,
                    None => {
                        warn!("Could not find entity '{}' in text", llm_entity.value);
                        continue;
                    }
                }
            };

            entities.push(ExternalEntity {
                value: llm_entity.value,
                label: llm_entity.entity_type,
                confidence: llm_entity.confidence,
                start,
                end,
            });
        }

        info!("Ollama extracted {} entities", entities.len());
        Ok(entities)
    }

    fn extract_json_from_response(&self, response: &str) -> Result<String> {
        // Templates with escaped braces sometimes leak `{{` into the output.
        let fixed_response = response.replace("{{", "{").replace("}}", "}");

        if let Some(start) = fixed_response.find('{') {
            let mut depth = 0usize;
            let mut end_pos = None;

            for (i, ch) in fixed_response[start..].char_indices() {
                match ch {
                    '{' => depth += 1,
                    '}' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            end_pos = Some(start + i);
                            break;
                        }
                    }
                    _ => {}
                }
            }

            if let Some(end_pos) = end_pos {
                let json_str = &fixed_response[start..=end_pos];
                if serde_json::from_str::<serde_json::Value>(json_str).is_ok() {
                    return Ok(json_str.to_string());
                }
            }
        }

        let trimmed = fixed_response.trim();
        if trimmed.starts_with('{')
            && trimmed.ends_with('}')
            && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
        {
            return Ok(trimmed.to_string());
        }

        Err(anyhow::anyhow!("No valid JSON found in Ollama response: {}", response))
    }

    fn find_entity_position(&self, text: &str, entity_value: &str) -> Option<(usize, usize)> {
        text.find(entity_value).map(|start| (start, start + entity_value.len()))
    }

    pub async fn health_check(&self) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }

        debug!("Performing Ollama health check");

        let response = self
            .client
            .get(format!("{}/api/tags", self.config.endpoint))
            .send()
            .await?;

        let is_healthy = response.status().is_success();

        if is_healthy {
            info!("Ollama health check passed");
        } else {
            warn!("Ollama health check failed: {}", response.status());
        }

        Ok(is_healthy)
    }
}

#[async_trait]
impl EntityProvider for OllamaClient {
    async fn detect_entities(&self, text: &str) -> Result<Vec<ExternalEntity>> {
        self.extract_entities(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config() -> OllamaConfig {
        OllamaConfig {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            timeout_seconds: 30,
            enabled: true,
        }
    }

    fn create_test_client(config: OllamaConfig) -> (OllamaClient, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let loader = PromptLoader::with_dir(temp_dir.path()).unwrap();
        let client = OllamaClient::with_prompt_loader(config, loader, None).unwrap();
        (client, temp_dir)
    }

    #[test]
    fn test_ollama_config_default() {
        let config = OllamaConfig::default();

        assert_eq!(config.endpoint, "http://localhost:11434");
        assert_eq!(config.model, "llama3.2:3b");
        assert_eq!(config.timeout_seconds, 30);
        assert!(!config.enabled);
    }

    #[test]
    fn test_ollama_client_creation() {
        let (client, _temp_dir) = create_test_client(create_test_config());

        assert_eq!(client.model(), "llama3.2:3b");
        assert_eq!(client.config.endpoint, "http://localhost:11434");
    }

    #[test]
    fn test_create_llm_prompt() {
        let (client, _temp_dir) = create_test_client(create_test_config());

        let text = "Contact Sarah Johnson at sarah@company.com";
        let prompt = client.prompt_loader.format_prompt(&client.prompt_template, text);

        assert!(prompt.contains(text));
        assert!(prompt.contains("person_name"));
        assert!(prompt.contains("JSON"));
        assert!(prompt.contains("entities"));
    }

    #[test]
    fn test_extract_json_from_response() {
        let (client, _temp_dir) = create_test_client(create_test_config());

        let embedded = r#"Here is the JSON: {"entities": [{"type": "person_name", "value": "John", "start": 0, "end": 4, "confidence": 0.9}]} End of response."#;
        let json = client.extract_json_from_response(embedded).unwrap();
        assert!(json.starts_with('{') && json.ends_with('}'));
        assert!(serde_json::from_str::<serde_json::Value>(&json).is_ok());

        let pure = r#"{"entities": []}"#;
        assert_eq!(client.extract_json_from_response(pure).unwrap(), pure);

        let several = "{\"entities\": [{\"type\": \"ssn\", \"value\": \"John\"}]}\n\n{\"entities\": []}";
        let first = client.extract_json_from_response(several).unwrap();
        assert!(first.contains("John"));
        assert!(!first.contains("}\n\n{"));

        let doubled = r#"{{"entities": [{{"type": "person_name", "value": "Sarah Johnson", "start": 0, "end": 13, "confidence": 0.9}}]}}"#;
        let repaired = client.extract_json_from_response(doubled).unwrap();
        assert!(repaired.contains("Sarah Johnson"));
        assert!(!repaired.contains("{{"));

        assert!(client.extract_json_from_response("No JSON here").is_err());
    }

    #[test]
    fn test_find_entity_position() {
        let (client, _temp_dir) = create_test_client(create_test_config());
        let text = "Contact Sarah Johnson at sarah@company.com";

        assert_eq!(client.find_entity_position(text, "Sarah Johnson"), Some((8, 21)));
        assert_eq!(client.find_entity_position(text, "Not Found"), None);
    }

    #[test]
    fn test_parse_valid_llm_response() {
        let (client, _temp_dir) = create_test_client(create_test_config());

        let response = r#"{"entities": [{"type": "person_name", "value": "Sarah", "start": 8, "end": 13, "confidence": 0.95}]}"#;
        let entities = client.parse_llm_response(response, "Contact Sarah Johnson").unwrap();

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label, "person_name");
        assert_eq!(entities[0].value, "Sarah");
        assert_eq!((entities[0].start, entities[0].end), (8, 13));
        assert_eq!(entities[0].confidence, 0.95);
    }

    #[test]
    fn test_parse_repairs_bad_offsets() {
        let (client, _temp_dir) = create_test_client(create_test_config());

        let response = r#"{"entities": [
            {"type": "person_name", "value": "Sarah", "start": 0, "end": 5},
            {"type": "email", "value": "nobody@example.com", "start": 40, "end": 58},
            {"type": "city", "value": "Zürich", "start": 2, "end": 3}
        ]}"#;
        let entities = client.parse_llm_response(response, "Contact Sarah in Zürich").unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!((entities[0].start, entities[0].end), (8, 13));
        assert_eq!(entities[0].confidence, 0.8);
        assert_eq!(&"Contact Sarah in Zürich"[entities[1].start..entities[1].end], "Zürich");
    }

    #[test]
    fn test_disabled_client() {
        let mut config = create_test_config();
        config.enabled = false;
        let (client, _temp_dir) = create_test_client(config);

        tokio_test::block_on(async {
            let entities = client.detect_entities("Some text").await.unwrap();
            assert!(entities.is_empty());
            assert!(!client.health_check().await.unwrap());
        });
    }
}
