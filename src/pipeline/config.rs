//! Pipeline tuning knobs

use std::time::Duration;

/// Configuration for the Pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Oracle calls per run before giving up on `OracleUnavailable`
    pub max_generation_attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub backoff_base_ms: u64,
    /// Upper bound on a single retry delay
    pub backoff_max_ms: u64,
    /// Bound on one generator call
    pub generation_timeout_ms: u64,
    /// Bound on one audit call
    pub audit_timeout_ms: u64,
    /// Wall-clock limit for one sandbox execution
    pub sandbox_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_generation_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            generation_timeout_ms: 180_000,
            audit_timeout_ms: 120_000,
            sandbox_timeout_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    pub fn with_max_generation_attempts(mut self, attempts: u32) -> Self {
        self.max_generation_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff_base_ms(mut self, ms: u64) -> Self {
        self.backoff_base_ms = ms;
        self
    }

    pub fn with_generation_timeout_ms(mut self, ms: u64) -> Self {
        self.generation_timeout_ms = ms;
        self
    }

    pub fn with_audit_timeout_ms(mut self, ms: u64) -> Self {
        self.audit_timeout_ms = ms;
        self
    }

    pub fn with_sandbox_timeout_ms(mut self, ms: u64) -> Self {
        self.sandbox_timeout_ms = ms;
        self
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn audit_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_timeout_ms)
    }

    /// Delay before the retry that follows `attempt` (1-based)
    ///
    /// `base * 2^(attempt-1)`, capped at `backoff_max_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self.backoff_base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.backoff_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_generation_attempts, 3);
        assert_eq!(config.sandbox_timeout_ms, 30_000);
    }

    #[test]
    fn test_backoff_doubles() {
        let config = PipelineConfig::default().with_backoff_base_ms(100);
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_capped() {
        let config = PipelineConfig::default().with_backoff_base_ms(10_000);
        assert_eq!(config.backoff_delay(5), Duration::from_millis(30_000));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_at_least_one_attempt() {
        let config = PipelineConfig::default().with_max_generation_attempts(0);
        assert_eq!(config.max_generation_attempts, 1);
    }
}
