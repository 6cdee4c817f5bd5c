use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use dataprep::logging;
use dataprep::sample::sample_job_yaml;
use dataprep::Executor;

#[derive(Parser)]
#[command(name = "dataprep")]
#[command(about = "Configuration-driven pipeline for preparing ML training datasets")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all jobs found at a path without running them
    List {
        /// Job file or directory of job files
        path: PathBuf,
    },
    /// Run every job found at a path
    Run {
        /// Job file or directory of job files
        path: PathBuf,
        /// Abort any single job after this many seconds
        #[arg(long)]
        deadline: Option<u64>,
    },
    /// Dump a template job spec to a file, or stdout if omitted
    Sample {
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { path } => {
            let listing = Executor::new().list(&path)?;
            println!("Total jobs: {}", listing.jobs.len());
            for job in &listing.jobs {
                println!("  {}", job.describe());
            }
            if !listing.failures.is_empty() {
                println!("\n⚠️  {} file(s) failed to parse:", listing.failures.len());
                for failure in &listing.failures {
                    println!("  {}: {}", failure.path.display(), failure.error);
                }
            }
        }
        Commands::Run { path, deadline } => {
            let executor = match deadline {
                Some(seconds) => Executor::with_deadline(seconds),
                None => Executor::new(),
            };
            let report = executor.run_path(&path).await?;

            println!("\n📊 Pipeline results:");
            for (source, records) in &report.succeeded {
                info!(job = %source.display(), records, "job succeeded");
                println!("  ✅ {} ({} records)", source.display(), records);
            }
            for failure in &report.failed {
                error!(job = %failure.path.display(), error = %failure.error, "job failed");
                println!("  ❌ {}: {}", failure.path.display(), failure.error);
            }
            if !report.all_succeeded() {
                std::process::exit(1);
            }
        }
        Commands::Sample { path } => {
            let yaml = sample_job_yaml()?;
            match path {
                Some(path) => {
                    std::fs::write(&path, yaml)?;
                    println!("Sample job written to {}", path.display());
                }
                None => print!("{yaml}"),
            }
        }
    }

    Ok(())
}
