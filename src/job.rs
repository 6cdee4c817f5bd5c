use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::stage::StageSpec;

/// An ordered sequence of validated stage configurations parsed from one
/// declarative job file. Stage order is exactly the key order in the file;
/// kinds may repeat.
#[derive(Debug, Clone)]
pub struct Job {
    pub source: PathBuf,
    pub stages: Vec<StageSpec>,
}

impl Job {
    /// Parses and validates one `.json`, `.yaml`, or `.yml` job file.
    /// Everything is resolved here; nothing is looked up during execution.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let value = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            Some("yaml") | Some("yml") => yaml_to_json(serde_yaml::from_str(&raw)?)?,
            other => {
                return Err(PipelineError::Config(format!(
                    "unsupported job file extension {:?} for '{}'",
                    other.unwrap_or(""),
                    path.display()
                )))
            }
        };
        Self::from_value(path.to_path_buf(), value)
    }

    pub fn from_value(source: PathBuf, value: Value) -> Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            _ => {
                return Err(PipelineError::Config(format!(
                    "job file '{}' must be a mapping of stage kinds",
                    source.display()
                )))
            }
        };
        let stages: Vec<StageSpec> = map
            .into_iter()
            .map(|(key, value)| StageSpec::from_key_value(&key, value))
            .collect::<Result<_>>()?;
        if stages.is_empty() {
            return Err(PipelineError::Config(format!(
                "job file '{}' declares no stages",
                source.display()
            )));
        }
        Ok(Self { source, stages })
    }

    /// One-line summary for `list` output.
    pub fn describe(&self) -> String {
        let kinds: Vec<&str> = self.stages.iter().map(|s| s.kind().as_str()).collect();
        format!("{}: {}", self.source.display(), kinds.join(" -> "))
    }
}

// serde_yaml mappings preserve insertion order, so converting through them
// keeps the declared stage order intact.
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = serde_json::Map::new();
            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    other => {
                        return Err(PipelineError::Config(format!(
                            "job mapping keys must be strings, got {other:?}"
                        )))
                    }
                };
                map.insert(key, yaml_to_json(value)?);
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;
    use std::io::Write;

    const YAML_JOB: &str = r#"
load:
  local:
    path: data/raw.jsonl
deduplicate:
  semantic:
    column: text
    threshold: 0.15
save:
  local:
    directory: out
"#;

    fn write_job(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn yaml_job_parses_stages_in_declared_order() {
        let file = write_job(YAML_JOB, ".yaml");
        let job = Job::from_file(file.path()).unwrap();
        let kinds: Vec<StageKind> = job.stages.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![StageKind::Load, StageKind::Deduplicate, StageKind::Save]
        );
    }

    #[test]
    fn json_job_parses() {
        let file = write_job(
            r#"{"load": {"local": {"path": "a.jsonl"}}, "save": {"local": {}}}"#,
            ".json",
        );
        let job = Job::from_file(file.path()).unwrap();
        assert_eq!(job.stages.len(), 2);
    }

    #[test]
    fn unknown_stage_key_fails_naming_the_key() {
        let file = write_job("mystery:\n  x: 1\n", ".yaml");
        let err = Job::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn empty_job_is_rejected() {
        let file = write_job("{}", ".json");
        assert!(Job::from_file(file.path()).is_err());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let file = write_job("load: {}", ".toml");
        assert!(matches!(
            Job::from_file(file.path()),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn describe_lists_stage_kinds() {
        let file = write_job(YAML_JOB, ".yaml");
        let job = Job::from_file(file.path()).unwrap();
        assert!(job.describe().contains("load -> deduplicate -> save"));
    }
}
