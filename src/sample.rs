use serde_json::json;

use crate::error::Result;
use crate::job::Job;
use crate::stage::StageSpec;

/// A template job spec covering every stage kind, used by the `sample`
/// subcommand as a starting point for new job files.
pub fn sample_job_yaml() -> Result<String> {
    let spec = json!({
        "load": {
            "local": {
                "path": "data/raw.jsonl",
                "take_rows": null
            }
        },
        "format": {
            "merger": {
                "fields": ["title", "body"],
                "separator": "\n",
                "merged_field": "text",
                "remove_merged": false
            }
        },
        "deduplicate": {
            "semantic": {
                "column": "text",
                "threshold": 0.2,
                "embeddings_model": "hashing-trigram",
                "cache_embeddings": false
            }
        },
        "analyze": {
            "quality": {
                "column": "text",
                "max_retries": 2
            }
        },
        "save": {
            "local": {
                "directory": "processed",
                "filetype": "jsonl"
            }
        }
    });
    Ok(serde_yaml::to_string(&spec)?)
}
