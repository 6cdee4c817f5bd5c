use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info};

use crate::error::{PipelineError, Result};
use crate::job::Job;
use crate::record::RecordBatch;
use crate::stage::build_stage;

/// A job file that failed to parse or to run, with the error attached.
#[derive(Debug)]
pub struct JobFailure {
    pub path: PathBuf,
    pub error: PipelineError,
}

/// Outcome of enumerating jobs at a path: parse failures never abort the
/// enumeration, they are collected alongside the good jobs.
pub struct Listing {
    pub jobs: Vec<Job>,
    pub failures: Vec<JobFailure>,
}

/// Outcome of a multi-job run; one job's failure never aborts its siblings.
pub struct RunReport {
    /// (job source, final kept-record count) per successful job.
    pub succeeded: Vec<(PathBuf, usize)>,
    pub failed: Vec<JobFailure>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

const JOB_FILE_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Pure orchestration over jobs and stages: no I/O of its own beyond
/// reading job files; all data I/O belongs to the stages.
pub struct Executor {
    /// Optional wall-clock deadline around each whole job run.
    pub deadline: Option<Duration>,
}

impl Executor {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    pub fn with_deadline(seconds: u64) -> Self {
        Self {
            deadline: Some(Duration::from_secs(seconds)),
        }
    }

    /// Parses one file or every job file in a directory, without executing
    /// anything.
    pub fn list(&self, path: &Path) -> Result<Listing> {
        let mut files: Vec<PathBuf> = if path.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(path)? {
                let entry = entry?.path();
                let ext = entry.extension().and_then(|e| e.to_str()).unwrap_or("");
                if entry.is_file() && JOB_FILE_EXTENSIONS.contains(&ext) {
                    files.push(entry);
                }
            }
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(PipelineError::Config(format!(
                "'{}' is neither a file nor a directory",
                path.display()
            )));
        };
        // Stable enumeration order regardless of filesystem order
        files.sort();

        let mut jobs = Vec::new();
        let mut failures = Vec::new();
        for file in files {
            match Job::from_file(&file) {
                Ok(job) => jobs.push(job),
                Err(error) => failures.push(JobFailure { path: file, error }),
            }
        }
        Ok(Listing { jobs, failures })
    }

    /// Runs one job: instantiates every stage up front (fail-fast on any
    /// configuration error), then folds the batch through them in declared
    /// order. Any stage error halts this job.
    pub async fn run_job(&self, job: &Job) -> Result<RecordBatch> {
        let run = self.fold_stages(job);
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, run)
                .await
                .map_err(|_| PipelineError::Timeout(deadline.as_secs()))?,
            None => run.await,
        }
    }

    async fn fold_stages(&self, job: &Job) -> Result<RecordBatch> {
        let stages = job
            .stages
            .iter()
            .map(build_stage)
            .collect::<Result<Vec<_>>>()?;

        let mut batch = RecordBatch::new();
        for (position, stage) in stages.iter().enumerate() {
            let kind = stage.kind();
            info!(job = %job.source.display(), stage = %kind, position, records = batch.len(), "applying stage");
            batch = stage
                .apply(batch)
                .await
                .map_err(|e| e.in_stage(kind.as_str(), position))?;
        }
        info!(job = %job.source.display(), records = batch.len(), "job complete");
        Ok(batch)
    }

    /// Runs every job found at the path. Jobs are isolated: failures are
    /// collected and reported together, never propagated across siblings.
    pub async fn run_path(&self, path: &Path) -> Result<RunReport> {
        let listing = self.list(path)?;
        let mut report = RunReport {
            succeeded: Vec::new(),
            failed: listing.failures,
        };
        for job in &listing.jobs {
            match self.run_job(job).await {
                Ok(batch) => report.succeeded.push((job.source.clone(), batch.len())),
                Err(error) => {
                    error!(job = %job.source.display(), %error, "job failed");
                    report.failed.push(JobFailure {
                        path: job.source.clone(),
                        error,
                    });
                }
            }
        }
        Ok(report)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    const GOOD_JOB: &str = "load:\n  local:\n    path: {data}\n";

    #[test]
    fn listing_collects_bad_files_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.yaml", "load:\n  local:\n    path: x.jsonl\n");
        write_file(dir.path(), "b.yaml", "not: a job\n");
        write_file(dir.path(), "c.yaml", "save:\n  local: {}\n");
        let listing = Executor::new().list(dir.path()).unwrap();
        assert_eq!(listing.jobs.len(), 2);
        assert_eq!(listing.failures.len(), 1);
        assert!(listing.failures[0].path.ends_with("b.yaml"));
    }

    #[test]
    fn non_job_files_are_ignored_in_directories() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "notes.txt", "hello");
        write_file(dir.path(), "a.yaml", "save:\n  local: {}\n");
        let listing = Executor::new().list(dir.path()).unwrap();
        assert_eq!(listing.jobs.len(), 1);
        assert!(listing.failures.is_empty());
    }

    #[tokio::test]
    async fn stage_errors_carry_kind_and_position() {
        let dir = tempfile::tempdir().unwrap();
        // load points at a file that does not exist, so the stage fails
        let job_path = write_file(
            dir.path(),
            "job.yaml",
            "load:\n  local:\n    path: /nonexistent/data.jsonl\n",
        );
        let job = Job::from_file(&job_path).unwrap();
        let err = Executor::new().run_job(&job).await.unwrap_err();
        match err {
            PipelineError::Stage { kind, position, .. } => {
                assert_eq!(kind, "load");
                assert_eq!(position, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn directory_run_isolates_job_failures() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_file(dir.path(), "data.jsonl", "{\"text\": \"hello\"}\n");
        let jobs = tempfile::tempdir().unwrap();
        write_file(
            jobs.path(),
            "good.yaml",
            &GOOD_JOB.replace("{data}", data.to_str().unwrap()),
        );
        write_file(
            jobs.path(),
            "bad.yaml",
            "load:\n  local:\n    path: /nonexistent/data.jsonl\n",
        );
        let report = Executor::new().run_path(jobs.path()).await.unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn end_to_end_pipeline_dedups_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_file(
            dir.path(),
            "data.jsonl",
            concat!(
                "{\"text\": \"the quick brown fox jumps over the lazy dog\"}\n",
                "{\"text\": \"the quick brown fox jumps over the lazy dog\"}\n",
                "{\"text\": \"an entirely different sentence about databases\"}\n",
            ),
        );
        let out = tempfile::tempdir().unwrap();
        let job_yaml = format!(
            "load:\n  local:\n    path: {}\n\
             deduplicate:\n  semantic:\n    column: text\n    threshold: 0.1\n\
             analyze:\n  quality:\n    column: text\n\
             save:\n  local:\n    directory: {}\n    filename: result\n    filetype: jsonl\n",
            data.display(),
            out.path().display()
        );
        let job_path = write_file(dir.path(), "job.yaml", &job_yaml);
        let job = Job::from_file(&job_path).unwrap();
        let batch = Executor::new().run_job(&job).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|r| r.contains("quality_index")));
        let written = std::fs::read_to_string(out.path().join("result.jsonl")).unwrap();
        assert_eq!(written.lines().count(), 2);
    }
}
