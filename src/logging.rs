use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_filter() -> EnvFilter {
    // RUST_LOG overrides; otherwise info-level for this crate only
    EnvFilter::from_default_env().add_directive(
        "dataprep=info"
            .parse()
            .expect("static directive always parses"),
    )
}

/// Sets up console logging plus a daily-rolling JSON log file under
/// `logs/`. The returned guard flushes the file writer; the caller keeps
/// it alive for the life of the process.
pub fn init_logging() -> WorkerGuard {
    let _ = std::fs::create_dir_all("logs");
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily("logs", "dataprep.log"));

    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().json().with_writer(file_writer))
        .with(fmt::layer().with_writer(std::io::stdout))
        .init();

    guard
}
