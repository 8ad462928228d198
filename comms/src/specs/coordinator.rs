use std::{
    fs::File,
    io::{self, BufReader},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// The amount of unique updates needed to aggregate when nothing else is configured.
pub const DEFAULT_UPDATE_THRESHOLD: NonZeroUsize = NonZeroUsize::new(10).unwrap();

/// The specification for the audit store backing the RONI records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AuditSpec {
    Memory,
    JsonLines { path: PathBuf },
}

/// The specification for the robustness audit ran after every aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoniSpec {
    #[serde(default)]
    pub eval_timeout_ms: Option<u64>,
    pub audit: AuditSpec,
}

impl RoniSpec {
    /// Returns the time limit of a single evaluation, if any.
    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout_ms.map(Duration::from_millis)
    }
}

/// The specification for the aggregation coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSpec {
    #[serde(default = "default_update_threshold")]
    pub update_threshold: NonZeroUsize,
    #[serde(default)]
    pub roni: Option<RoniSpec>,
}

fn default_update_threshold() -> NonZeroUsize {
    DEFAULT_UPDATE_THRESHOLD
}

impl Default for CoordinatorSpec {
    fn default() -> Self {
        Self {
            update_threshold: DEFAULT_UPDATE_THRESHOLD,
            roni: None,
        }
    }
}

impl CoordinatorSpec {
    /// Parses a `CoordinatorSpec` from a json document.
    ///
    /// # Arguments
    /// * `json` - The json document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Reads a `CoordinatorSpec` from a json file.
    ///
    /// # Arguments
    /// * `path` - The location of the json file.
    ///
    /// # Returns
    /// The parsed spec or an io error, invalid json is reported as `InvalidData`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let spec = serde_json::from_reader(BufReader::new(file))?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let spec = CoordinatorSpec::from_json("{}").unwrap();
        assert_eq!(spec, CoordinatorSpec::default());
        assert_eq!(spec.update_threshold.get(), 10);
    }

    #[test]
    fn test_roni_with_json_lines_store() {
        let json = r#"{
            "update_threshold": 3,
            "roni": {
                "eval_timeout_ms": 2500,
                "audit": { "kind": "json_lines", "path": "/var/lib/fedavg/roni.jsonl" }
            }
        }"#;

        let spec = CoordinatorSpec::from_json(json).unwrap();
        let roni = spec.roni.unwrap();

        assert_eq!(spec.update_threshold.get(), 3);
        assert_eq!(roni.eval_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(
            roni.audit,
            AuditSpec::JsonLines {
                path: "/var/lib/fedavg/roni.jsonl".into()
            }
        );
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        assert!(CoordinatorSpec::from_json(r#"{ "update_threshold": 0 }"#).is_err());
    }

    #[test]
    fn test_memory_store_without_timeout() {
        let json = r#"{ "roni": { "audit": { "kind": "memory" } } }"#;
        let roni = CoordinatorSpec::from_json(json).unwrap().roni.unwrap();

        assert_eq!(roni.audit, AuditSpec::Memory);
        assert_eq!(roni.eval_timeout(), None);
    }
}
