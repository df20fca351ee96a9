//! ═══════════════════════════════════════════════════════════════════════════════
//! ATTACK CONFIG — Search Budgets and Thresholds
//! ═══════════════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::attack::{ParentSelection, SuccessCriterion};
use crate::error::{ConfigError, Result};
use crate::feature::{FeatureBuilder, FeatureLayout};
use crate::oracle::HttpOracle;
use crate::program::Language;

/// Main attack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// Source language; selects the identifier extractor
    pub language: Language,

    /// Oracle input encoding
    pub feature: FeatureConfig,

    /// Candidates scored per GA generation
    pub batch_size: usize,

    /// When an attack counts as successful
    pub success: SuccessCriterion,

    /// Genetic search parameters
    pub genetic: GeneticConfig,

    /// Metropolis-Hastings parameters
    pub mhm: MhmConfig,

    /// Remote oracle settings
    pub oracle: OracleConfig,

    /// RNG seed
    pub seed: u64,
}

/// Feature builder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Maximum oracle input length, boundary tokens included
    pub block_size: usize,
    pub layout: FeatureLayout,
}

/// Genetic search parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    /// Probability of crossover (else mutation)
    pub cross_probability: f64,
    /// Generations = max(generation_factor × population, min_generations)
    pub generation_factor: usize,
    pub min_generations: usize,
    pub parent_selection: ParentSelection,
}

/// Metropolis-Hastings parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MhmConfig {
    /// Candidate names sampled per iteration
    pub n_candidates: usize,
    /// Iteration budget
    pub max_iter: usize,
    /// Minimum acceptance ratio
    pub prob_threshold: f64,
    /// Smoothing constant of the acceptance ratio
    pub epsilon: f64,
}

/// Remote oracle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            layout: FeatureLayout::Bounded,
        }
    }
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            cross_probability: 0.7,
            generation_factor: 5,
            min_generations: 10,
            parent_selection: ParentSelection::Uniform,
        }
    }
}

impl Default for MhmConfig {
    fn default() -> Self {
        Self {
            n_candidates: 30,
            max_iter: 100,
            prob_threshold: 0.95,
            epsilon: 1e-10,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
            api_key: None,
            model: None,
        }
    }
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            language: Language::C,
            feature: FeatureConfig::default(),
            batch_size: 16,
            success: SuccessCriterion::LabelFlip,
            genetic: GeneticConfig::default(),
            mhm: MhmConfig::default(),
            oracle: OracleConfig::default(),
            seed: 42,
        }
    }
}

impl AttackConfig {
    /// Load config: defaults, then the JSON file if given, then environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let contents = std::fs::read_to_string(p)?;
                serde_json::from_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VARFLIP_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &str, value: String) -> Result<T> {
            value.trim().parse().map_err(|_| {
                ConfigError::BadOverride {
                    var: var.to_string(),
                    value,
                }
                .into()
            })
        }

        if let Some(v) = lookup("VARFLIP_SEED") {
            self.seed = parse("VARFLIP_SEED", v)?;
        }
        if let Some(v) = lookup("VARFLIP_BLOCK_SIZE") {
            self.feature.block_size = parse("VARFLIP_BLOCK_SIZE", v)?;
        }
        if let Some(v) = lookup("VARFLIP_BATCH_SIZE") {
            self.batch_size = parse("VARFLIP_BATCH_SIZE", v)?;
        }
        if let Some(v) = lookup("VARFLIP_ENDPOINT") {
            self.oracle.endpoint = Some(v);
        }
        if let Some(v) = lookup("VARFLIP_API_KEY") {
            self.oracle.api_key = Some(v);
        }
        Ok(())
    }

    /// Reject settings no search can run with
    pub fn validate(&self) -> Result<()> {
        let out_of_range = |field: &str, reason: &str| -> crate::error::VarflipError {
            ConfigError::OutOfRange {
                field: field.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        if self.feature.layout == FeatureLayout::Bounded && self.feature.block_size < 3 {
            return Err(out_of_range("feature.block_size", "must be at least 3"));
        }
        if self.batch_size == 0 {
            return Err(out_of_range("batch_size", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.genetic.cross_probability) {
            return Err(out_of_range("genetic.cross_probability", "must be in [0, 1]"));
        }
        if self.mhm.n_candidates == 0 {
            return Err(out_of_range("mhm.n_candidates", "must be > 0"));
        }
        if self.mhm.epsilon < 0.0 {
            return Err(out_of_range("mhm.epsilon", "must be >= 0"));
        }
        if let SuccessCriterion::ScoreRatio { ratio } = self.success {
            if ratio <= 0.0 {
                return Err(out_of_range("success.ratio", "must be > 0"));
            }
        }
        Ok(())
    }

    /// Save config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn feature_builder(&self) -> FeatureBuilder {
        FeatureBuilder::new(self.feature.block_size, self.feature.layout)
    }

    /// HTTP oracle for `endpoint`, or the configured one
    pub fn http_oracle(&self, endpoint: Option<&str>) -> Result<HttpOracle> {
        let endpoint = endpoint
            .map(str::to_string)
            .or_else(|| self.oracle.endpoint.clone())
            .ok_or_else(|| {
                crate::error::VarflipError::Validation("no oracle endpoint configured".to_string())
            })?;
        let mut oracle = HttpOracle::new(endpoint)
            .with_timeout(std::time::Duration::from_secs(self.oracle.timeout_secs));
        if let Some(key) = &self.oracle.api_key {
            oracle = oracle.with_api_key(key.clone());
        }
        if let Some(model) = &self.oracle.model {
            oracle = oracle.with_model(model.clone());
        }
        Ok(oracle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VarflipError;

    #[test]
    fn test_defaults() {
        let config = AttackConfig::default();
        assert_eq!(config.feature.block_size, 512);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.genetic.cross_probability, 0.7);
        assert_eq!(config.mhm.max_iter, 100);
        assert_eq!(config.mhm.prob_threshold, 0.95);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AttackConfig = serde_json::from_str(
            r#"{"language": "java", "mhm": {"max_iter": 7}, "success": {"score_ratio": {"ratio": 0.5}}}"#,
        )
        .unwrap();
        assert_eq!(config.language, Language::Java);
        assert_eq!(config.mhm.max_iter, 7);
        assert_eq!(config.mhm.n_candidates, 30);
        assert_eq!(config.success, SuccessCriterion::ScoreRatio { ratio: 0.5 });
    }

    #[test]
    fn test_overrides() {
        let mut config = AttackConfig::default();
        config
            .apply_overrides(|var| match var {
                "VARFLIP_SEED" => Some("7".to_string()),
                "VARFLIP_BATCH_SIZE" => Some(" 4 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.batch_size, 4);

        let err = config
            .apply_overrides(|var| (var == "VARFLIP_BLOCK_SIZE").then(|| "big".to_string()))
            .unwrap_err();
        assert!(matches!(err, VarflipError::Config(ConfigError::BadOverride { .. })));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = AttackConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AttackConfig::default();
        config.genetic.cross_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = AttackConfig::default();
        config.feature.layout = FeatureLayout::Raw;
        config.feature.block_size = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("varflip.json");
        let mut config = AttackConfig::default();
        config.seed = 1234;
        config.save(&path).unwrap();
        let loaded: AttackConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.seed, 1234);
    }

    #[test]
    fn test_http_oracle_needs_endpoint() {
        let config = AttackConfig::default();
        assert!(config.http_oracle(None).is_err());
        assert!(config.http_oracle(Some("http://localhost:1")).is_ok());
    }
}
