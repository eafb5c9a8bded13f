//! Batch job implementation
//!
//! Points run one after another through conversion, panorama resolution and
//! image acquisition. Every point ends in exactly one [`ProcessingOutcome`];
//! only failures to read the input or to persist results abort the job.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use indexmap::IndexMap;
use tracing::{error, info, warn};

use crate::{
    acquire::{AcquireRequest, Acquirer},
    config::Config,
    coordinate::CoordinateTransform,
    http::Fetch,
    panorama::PanoramaResolver,
    progress::{BatchPhase, PointStatus, ProgressReporter},
};

use super::{
    checkpoint::{self, Checkpoint},
    outcome::{ProcessStatus, ProcessingOutcome},
    table::{self, LAT, LON, PID, Row, SamplePoint, Table},
};

/// Error type for the batch job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("input: {0}")]
    Input(table::Error),
    #[error("previous output: {0}")]
    PreviousOutput(table::Error),
    #[error("output: {0}")]
    Output(table::Error),
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] checkpoint::Error),
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Points processed by this run.
    pub processed: usize,
    /// Rows in the output table, including rows kept from earlier runs.
    pub total_rows: usize,
    /// Output rows per `process_status`.
    pub status_counts: IndexMap<String, usize>,
}

/// Drives a table of sample points through the acquisition pipeline.
pub struct BatchJob<'a, F, T> {
    pub fetch: &'a F,
    pub transform: &'a T,
    pub config: &'a Config,
    pub acquirer: Acquirer,
    pub reporter: Arc<dyn ProgressReporter>,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_owned()
    }
}

impl<F: Fetch, T: CoordinateTransform> BatchJob<'_, F, T> {
    async fn pipeline(&self, point: &SamplePoint) -> ProcessingOutcome {
        let pid = point.pid.as_str();
        let coordinate = match self.transform.transform(point.lon, point.lat).await {
            Ok(coordinate) => coordinate,
            Err(error) => {
                warn!(pid, %error, "coordinate conversion failed");
                return ProcessingOutcome::failed(ProcessStatus::CoordinateFailure);
            }
        };

        let resolver = PanoramaResolver::new(self.fetch, &self.config.endpoints.street_view);
        let id = match resolver.find_panorama(coordinate).await {
            Ok(id) => id,
            Err(error) => {
                warn!(pid, %error, "no panorama");
                return ProcessingOutcome::failed(ProcessStatus::NoPanorama);
            }
        };
        let resolved = match resolver.metadata(&id, self.config.target_year()).await {
            Ok(resolved) => resolved,
            Err(error) => {
                warn!(pid, %error, "metadata unavailable");
                return ProcessingOutcome {
                    bd_id: Some(id),
                    ..ProcessingOutcome::failed(ProcessStatus::MetadataFailure)
                };
            }
        };

        let request = AcquireRequest {
            panorama_id: &resolved.id,
            move_dir: resolved.metadata.move_dir,
            pid,
            lon: point.lon,
            lat: point.lat,
        };
        let image_paths = match self.acquirer.acquire(self.fetch, &request).await {
            Ok(paths) => paths,
            Err(error) => {
                error!(pid, %error, "image acquisition failed");
                return ProcessingOutcome::failed(ProcessStatus::error(error));
            }
        };
        let status = if image_paths.is_empty() {
            warn!(pid, id = %resolved.id, "no images saved");
            ProcessStatus::ImageFailure
        } else {
            ProcessStatus::Success
        };
        ProcessingOutcome {
            bd_id: Some(resolved.id),
            move_dir: resolved.metadata.move_dir,
            content: Some(resolved.metadata.raw_content),
            image_paths,
            status,
        }
    }

    /// Run the pipeline for one point. Never fails: every problem, a panic
    /// included, becomes the outcome's status.
    pub async fn process_point(&self, point: &SamplePoint) -> ProcessingOutcome {
        info!(pid = %point.pid, lon = point.lon, lat = point.lat, "processing point");
        let outcome = AssertUnwindSafe(self.pipeline(point))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!(pid = %point.pid, panic = %message, "pipeline panicked");
                ProcessingOutcome::failed(ProcessStatus::error(message))
            });
        info!(pid = %point.pid, status = %outcome.status, "point finished");
        outcome
    }

    /// Results so far and the ids to skip.
    async fn initial_state(&self, input: &Table) -> Result<(Table, Checkpoint), JobError> {
        let paths = &self.config.paths;
        let fresh = Table::new(&paths.output, input.headers().to_vec());
        if !self.config.resume {
            return Ok((fresh, Checkpoint::new(paths.checkpoint(), Default::default())));
        }
        if !tokio::fs::try_exists(&paths.output).await.unwrap_or(false) {
            return Ok((fresh, Checkpoint::load(paths.checkpoint()).await?));
        }
        let previous = Table::read(&paths.output)
            .await
            .map_err(JobError::PreviousOutput)
            .inspect_err(|error| error!(%error, "failed to read previous output"))?;
        let checkpoint = match previous.pids() {
            Some(pids) => Checkpoint::new(paths.checkpoint(), pids),
            None => Checkpoint::load(paths.checkpoint()).await?,
        };
        Ok((previous, checkpoint))
    }

    /// Process every input point not handled by an earlier run.
    pub async fn run(&self) -> Result<Summary, JobError> {
        let paths = &self.config.paths;
        self.reporter.set_phase(BatchPhase::LoadingInput);
        let input = Table::read(&paths.input)
            .await
            .and_then(|input| input.require_columns(&[PID, LON, LAT]).map(|()| input))
            .map_err(JobError::Input)
            .inspect_err(|error| {
                error!(%error, "unusable input table");
                self.reporter.set_phase(BatchPhase::Failed(error.to_string()));
            })?;

        let (mut results, mut checkpoint) = self.initial_state(&input).await?;
        if self.config.resume {
            info!(
                processed = checkpoint.processed().len(),
                "resuming previous crawl"
            );
        }
        let pending: Vec<&Row> = input
            .rows()
            .iter()
            .filter(|row| !checkpoint.contains(row.get(PID).map(String::as_str).unwrap_or_default()))
            .collect();
        info!(pending = pending.len(), total = input.len(), "points to process");

        if pending.is_empty() {
            info!("nothing to process");
            let status_counts = results.status_counts();
            self.reporter.set_phase(BatchPhase::Completed);
            self.reporter.finish(&status_counts);
            return Ok(Summary {
                processed: 0,
                total_rows: results.len(),
                status_counts,
            });
        }

        self.reporter.register_points(pending.len());
        let batch_size = self.config.batch_size.max(1);
        let batches = pending.len().div_ceil(batch_size);
        for (index, batch) in pending.chunks(batch_size).enumerate() {
            info!(batch = index + 1, batches, points = batch.len(), "processing batch");
            self.reporter.set_phase(BatchPhase::Processing {
                batch: index + 1,
                batches,
            });
            for row in batch {
                let point = SamplePoint::from_row(row);
                self.reporter
                    .update_point(&point.pid, PointStatus::Processing);
                let outcome = self.process_point(&point).await;
                self.reporter.update_point(
                    &point.pid,
                    if outcome.status.is_success() {
                        PointStatus::Done
                    } else {
                        PointStatus::Failed(outcome.status.to_string())
                    },
                );

                let mut row = (*row).clone();
                for (column, cell) in outcome.columns() {
                    row.insert(column.to_owned(), cell);
                }
                results.push(row);
                checkpoint
                    .record(&point.pid)
                    .await
                    .inspect_err(|error| error!(%error, "failed to save checkpoint"))?;
            }
            results
                .write(&paths.output)
                .await
                .map_err(JobError::Output)
                .inspect_err(|error| error!(%error, "failed to save results"))?;

            if index + 1 < batches && !self.config.batch_delay.is_zero() {
                info!(delay = ?self.config.batch_delay, "waiting before next batch");
                self.reporter
                    .set_phase(BatchPhase::Waiting(self.config.batch_delay));
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }

        checkpoint
            .discard()
            .await
            .inspect_err(|error| error!(%error, "failed to remove checkpoint"))?;

        let status_counts = results.status_counts();
        info!(rows = results.len(), processed = pending.len(), "crawl completed");
        for (status, count) in &status_counts {
            info!(%status, count, "status count");
        }
        self.reporter.set_phase(BatchPhase::Completed);
        self.reporter.finish(&status_counts);
        Ok(Summary {
            processed: pending.len(),
            total_rows: results.len(),
            status_counts,
        })
    }
}
