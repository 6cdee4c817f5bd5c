//! Configuration-driven pipeline for preparing ML training datasets:
//! load raw records, reformat them, remove semantic near-duplicates,
//! score quality, and persist the result.

pub mod dedup;
pub mod error;
pub mod executor;
pub mod job;
pub mod logging;
pub mod record;
pub mod sample;
pub mod stage;

pub use error::{PipelineError, Result};
pub use executor::{Executor, Listing, RunReport};
pub use job::Job;
pub use record::{Record, RecordBatch};
