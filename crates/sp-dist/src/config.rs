use serde::Deserialize;

use crate::DistError;

pub const DEFAULT_SAMPLE_SIZE_PER_PARTITION: usize = 100;

pub const SAMPLE_SIZE_VAR: &str = "SPARSITY_SAMPLE_SIZE";
pub const NUM_THREADS_VAR: &str = "SPARSITY_NUM_THREADS";

/// Tuning for distributed operations. Passed explicitly to the operations
/// that need it; nothing reads the environment implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DistConfig {
    /// Row labels sampled from each partition when choosing divisions for
    /// a distributed sort.
    pub sample_size_per_partition: usize,
    /// Worker threads for `ThreadPoolExecutor`; 0 means one per core.
    pub num_threads: usize,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self {
            sample_size_per_partition: DEFAULT_SAMPLE_SIZE_PER_PARTITION,
            num_threads: 0,
        }
    }
}

impl DistConfig {
    /// Defaults overridden by `SPARSITY_SAMPLE_SIZE` and
    /// `SPARSITY_NUM_THREADS` when they are set.
    pub fn from_env() -> Result<Self, DistError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DistConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DistError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(SAMPLE_SIZE_VAR) {
            config.sample_size_per_partition = parse_count(SAMPLE_SIZE_VAR, &raw)?;
        }
        if let Some(raw) = lookup(NUM_THREADS_VAR) {
            config.num_threads = parse_count(NUM_THREADS_VAR, &raw)?;
        }
        Ok(config)
    }
}

fn parse_count(var: &str, raw: &str) -> Result<usize, DistError> {
    raw.trim().parse().map_err(|_| DistError::Config {
        var: var.to_owned(),
        value: raw.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{DistConfig, NUM_THREADS_VAR, SAMPLE_SIZE_VAR, parse_count};
    use crate::DistError;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = DistConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config, DistConfig::default());
        assert_eq!(config.sample_size_per_partition, 100);
    }

    #[test]
    fn variables_override_defaults() {
        let config =
            DistConfig::from_lookup(lookup(&[(SAMPLE_SIZE_VAR, "16"), (NUM_THREADS_VAR, " 2 ")]))
                .expect("valid values");
        assert_eq!(config.sample_size_per_partition, 16);
        assert_eq!(config.num_threads, 2);
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let err = DistConfig::from_lookup(lookup(&[(NUM_THREADS_VAR, "many")]))
            .expect_err("not a number");
        assert!(matches!(err, DistError::Config { ref var, .. } if var == NUM_THREADS_VAR));
        assert!(parse_count("X", "-1").is_err());
    }

    #[test]
    fn json_config_fills_missing_fields() {
        let config: DistConfig =
            serde_json::from_str(r#"{"num_threads": 8}"#).expect("partial config");
        assert_eq!(config.num_threads, 8);
        assert_eq!(config.sample_size_per_partition, 100);
    }
}
