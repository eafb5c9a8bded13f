//! Batch crawling module
//!
//! This module drives whole CSV tables of sample points through the
//! acquisition pipeline, with checkpointing for resumable runs.

pub mod checkpoint;
mod executor;
pub mod outcome;
pub mod table;

pub use executor::{BatchJob, JobError, Summary};
pub use outcome::{ProcessStatus, ProcessingOutcome};
pub use table::{SamplePoint, Table};
