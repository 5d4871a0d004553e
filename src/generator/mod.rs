//! Generator - produces candidate source through the oracle
//!
//! Build mode writes a new implementation from intent and signature; fix
//! mode repairs a failing one given its failure trace. Every candidate is
//! checked structurally before it is returned. A candidate that fails the
//! checks is retried once with an amended prompt naming the violations;
//! a second failure is `GenerationInvalid`.

pub mod checks;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::domain::Signature;
use crate::error::{AnvilError, Result};
use crate::llm::{CompletionRequest, LlmClient};

pub use checks::{check_parameterization, check_source, extract_code};

/// Attempts per request: the original plus one amended retry
const MAX_STRUCTURAL_ATTEMPTS: usize = 2;

/// Source of candidate implementations
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a brand-new implementation
    async fn build(&self, intent: &str, signature: &Signature) -> Result<String>;

    /// Produce a repaired implementation
    async fn fix(&self, intent: &str, signature: &Signature, prior_source: &str, failure_trace: &str)
    -> Result<String>;
}

/// Generator backed by an LLM
pub struct OracleGenerator {
    llm: Arc<dyn LlmClient>,
    max_tokens: Option<u32>,
}

impl OracleGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, max_tokens: None }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    async fn generate(&self, user_prompt: String, signature: &Signature) -> Result<String> {
        let mut prompt = user_prompt.clone();
        let mut last_violations = Vec::new();

        for attempt in 1..=MAX_STRUCTURAL_ATTEMPTS {
            let mut request = CompletionRequest::new(prompt::SYSTEM_PROMPT).with_user_message(prompt.as_str());
            request.max_tokens = self.max_tokens;

            debug!("Oracle request attempt {} ({} chars)", attempt, prompt.len());
            let response = self.llm.complete(request).await?;
            let source = extract_code(&response.content);

            let mut violations = check_source(&source, signature);
            if response.is_truncated() {
                violations.insert(0, "reply was cut off at the token limit; return a shorter implementation".to_string());
            }
            if violations.is_empty() {
                info!("Generated candidate on attempt {} ({} bytes)", attempt, source.len());
                return Ok(source);
            }

            warn!("Candidate failed structural checks (attempt {}): {}", attempt, violations.join("; "));
            prompt = prompt::amend_prompt(&user_prompt, &source, &violations);
            last_violations = violations;
        }

        Err(AnvilError::GenerationInvalid(last_violations.join("; ")))
    }
}

impl std::fmt::Debug for OracleGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleGenerator")
            .field("model", &self.llm.model())
            .finish()
    }
}

#[async_trait]
impl Generator for OracleGenerator {
    async fn build(&self, intent: &str, signature: &Signature) -> Result<String> {
        self.generate(prompt::build_prompt(intent, signature), signature).await
    }

    async fn fix(
        &self,
        intent: &str,
        signature: &Signature,
        prior_source: &str,
        failure_trace: &str,
    ) -> Result<String> {
        self.generate(prompt::fix_prompt(intent, signature, prior_source, failure_trace), signature)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, MockLlmClient, StopReason};

    const GOOD: &str = "```python\ndef run(city):\n    return float(len(city))\n```";
    const HARDCODED: &str = "```python\ndef run(city):\n    return lookup('London')\n```";

    fn sig() -> Signature {
        Signature::parse("(city: string) -> number").unwrap()
    }

    #[tokio::test]
    async fn test_build_returns_extracted_code() {
        let llm = Arc::new(MockLlmClient::new(vec![GOOD]));
        let generator = OracleGenerator::new(llm.clone());

        let source = generator.build("temperature", &sig()).await.unwrap();
        assert_eq!(source, "def run(city):\n    return float(len(city))");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_once_with_amended_prompt() {
        let llm = Arc::new(MockLlmClient::new(vec![HARDCODED, GOOD]));
        let generator = OracleGenerator::new(llm.clone());

        generator.build("temperature", &sig()).await.unwrap();
        assert_eq!(llm.call_count(), 2);

        let second = &llm.requests()[1];
        let text = second.last_user_message().unwrap();
        assert!(text.contains("REJECTED"));
        assert!(text.contains("`city` is never used"));
    }

    #[tokio::test]
    async fn test_two_failures_is_generation_invalid() {
        let llm = Arc::new(MockLlmClient::new(vec![HARDCODED, HARDCODED, GOOD]));
        let generator = OracleGenerator::new(llm.clone());

        let err = generator.build("temperature", &sig()).await.unwrap_err();
        assert!(matches!(err, AnvilError::GenerationInvalid(_)));
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_oracle_unavailable_propagates() {
        let llm = Arc::new(MockLlmClient::default().then_unavailable("connection refused"));
        let generator = OracleGenerator::new(llm);

        let err = generator.build("temperature", &sig()).await.unwrap_err();
        assert!(err.is_transient());
    }

    struct TruncatingClient;

    #[async_trait]
    impl LlmClient for TruncatingClient {
        async fn complete(&self, _: CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                stop_reason: StopReason::MaxTokens,
                ..CompletionResponse::text(GOOD)
            })
        }

        fn model(&self) -> &str {
            "truncating"
        }

        fn is_ready(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_truncated_reply_is_rejected() {
        let generator = OracleGenerator::new(Arc::new(TruncatingClient));
        match generator.build("temperature", &sig()).await {
            Err(AnvilError::GenerationInvalid(msg)) => assert!(msg.contains("token limit")),
            other => panic!("expected GenerationInvalid, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fix_sends_trace() {
        let llm = Arc::new(MockLlmClient::new(vec![GOOD]));
        let generator = OracleGenerator::new(llm.clone()).with_max_tokens(256);

        generator
            .fix("temperature", &sig(), "def run(city):\n    raise IOError()\n", "OSError: unreachable")
            .await
            .unwrap();

        let request = &llm.requests()[0];
        assert_eq!(request.max_tokens, Some(256));
        assert!(request.last_user_message().unwrap().contains("OSError: unreachable"));
    }
}
