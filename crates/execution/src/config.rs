use serde::Deserialize;

/// Default cap on evidence taken from the pool for one proposal.
pub const DEFAULT_MAX_EVIDENCE_PER_BLOCK: usize = 100;

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum pieces of evidence included in a proposed block.
    pub max_evidence_per_block: usize,
    /// Write every transaction result to the tx-hash index.
    pub index_tx_results: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_evidence_per_block: DEFAULT_MAX_EVIDENCE_PER_BLOCK,
            index_tx_results: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{ "index_tx_results": false }"#).unwrap();
        assert_eq!(config.max_evidence_per_block, DEFAULT_MAX_EVIDENCE_PER_BLOCK);
        assert!(!config.index_tx_results);
    }
}
