//! Progress reporting and display
//!
//! The batch job reports what it is doing through [`ProgressReporter`], so the
//! crawl itself stays independent of how (or whether) progress is shown.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use indexmap::IndexMap;

/// Status of a single sample point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointStatus {
    /// Pipeline running
    Processing,
    /// At least one image saved
    Done,
    /// Finished without images; carries the recorded status
    Failed(String),
}

/// Phase of the overall crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPhase {
    /// Reading the input and any previous output
    LoadingInput,
    /// Working through batch `batch` of `batches`
    Processing { batch: usize, batches: usize },
    /// Pausing between batches
    Waiting(Duration),
    /// Completed successfully
    Completed,
    /// Failed with error
    Failed(String),
}

/// Progress reporter trait - implement this for different display backends.
pub trait ProgressReporter: Send + Sync {
    /// Set the overall phase.
    fn set_phase(&self, phase: BatchPhase);

    /// Announce how many points this run will process.
    fn register_points(&self, total: usize);

    /// Update the status of a specific point.
    fn update_point(&self, pid: &str, status: PointStatus);

    /// Finish the display and print the per-status counts of the output table.
    fn finish(&self, status_counts: &IndexMap<String, usize>);
}

/// A no-op reporter for when progress display is disabled.
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn set_phase(&self, _phase: BatchPhase) {}
    fn register_points(&self, _total: usize) {}
    fn update_point(&self, _pid: &str, _status: PointStatus) {}
    fn finish(&self, _status_counts: &IndexMap<String, usize>) {}
}

/// Statistics collected during processing.
#[derive(Debug)]
struct Stats {
    total_points: usize,
    successful_points: usize,
    failed_points: usize,
    start_time: Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_points: 0,
            successful_points: 0,
            failed_points: 0,
            start_time: Instant::now(),
        }
    }
}

impl Stats {
    fn record(&mut self, status: &PointStatus) {
        match status {
            PointStatus::Done => self.successful_points += 1,
            PointStatus::Failed(_) => self.failed_points += 1,
            PointStatus::Processing => {}
        }
    }

    fn print_summary(&self, status_counts: &IndexMap<String, usize>) {
        eprintln!();
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("📊 Summary");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("   📍 Points:     {} this run", self.total_points);
        eprintln!("   ✅ Successful: {}", self.successful_points);
        if self.failed_points > 0 {
            eprintln!("   ❌ Failed:     {}", self.failed_points);
        }
        if !status_counts.is_empty() {
            eprintln!("   📄 Output table:");
            for (status, count) in status_counts {
                eprintln!("      {status}: {count}");
            }
        }
        eprintln!(
            "   ⏱️  Duration:   {:.2}s",
            self.start_time.elapsed().as_secs_f64()
        );
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}

/// Statistics stay usable after a panic elsewhere poisoned the lock.
fn write(stats: &RwLock<Stats>) -> std::sync::RwLockWriteGuard<'_, Stats> {
    stats.write().unwrap_or_else(PoisonError::into_inner)
}

fn read(stats: &RwLock<Stats>) -> std::sync::RwLockReadGuard<'_, Stats> {
    stats.read().unwrap_or_else(PoisonError::into_inner)
}

fn phase_message(phase: &BatchPhase) -> String {
    match phase {
        BatchPhase::LoadingInput => "📋 Loading input...".to_owned(),
        BatchPhase::Processing { batch, batches } => {
            format!("📍 Processing batch {batch}/{batches}...")
        }
        BatchPhase::Waiting(delay) => {
            format!("⏳ Waiting {:.1}s before next batch...", delay.as_secs_f64())
        }
        BatchPhase::Completed => "✅ Completed!".to_owned(),
        BatchPhase::Failed(e) => format!("❌ Failed: {e}"),
    }
}

/// A simple reporter that just prints to stderr (for non-TTY).
#[derive(Default)]
pub struct SimpleReporter {
    stats: RwLock<Stats>,
}

impl SimpleReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for SimpleReporter {
    fn set_phase(&self, phase: BatchPhase) {
        eprintln!("{}", phase_message(&phase));
    }

    fn register_points(&self, total: usize) {
        write(&self.stats).total_points = total;
        eprintln!("   {total} points to process");
    }

    fn update_point(&self, pid: &str, status: PointStatus) {
        write(&self.stats).record(&status);
        match status {
            PointStatus::Done => eprintln!("   ✓ {pid}"),
            PointStatus::Failed(ref e) => eprintln!("   ✗ {pid}: {e}"),
            PointStatus::Processing => {}
        }
    }

    fn finish(&self, status_counts: &IndexMap<String, usize>) {
        read(&self.stats).print_summary(status_counts);
    }
}

/// Fancy interactive reporter with progress bars (for TTY).
pub struct FancyReporter {
    multi: indicatif::MultiProgress,
    phase_bar: indicatif::ProgressBar,
    main_progress: RwLock<Option<indicatif::ProgressBar>>,
    stats: RwLock<Stats>,
}

impl FancyReporter {
    pub fn new() -> Self {
        let multi = indicatif::MultiProgress::new();
        let phase_bar = multi.add(indicatif::ProgressBar::new_spinner());
        if let Ok(style) = indicatif::ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")
        {
            phase_bar.set_style(style);
        }
        phase_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            phase_bar,
            main_progress: RwLock::new(None),
            stats: RwLock::new(Stats::default()),
        }
    }

    fn with_main_progress(&self, f: impl FnOnce(&indicatif::ProgressBar)) {
        let main_progress = self
            .main_progress
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(ref main_pb) = *main_progress {
            f(main_pb);
        }
    }
}

impl Default for FancyReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for FancyReporter {
    fn set_phase(&self, phase: BatchPhase) {
        let msg = phase_message(&phase);
        match phase {
            BatchPhase::Completed | BatchPhase::Failed(_) => {
                self.phase_bar.finish_with_message(msg)
            }
            _ => self.phase_bar.set_message(msg),
        }
    }

    fn register_points(&self, total: usize) {
        write(&self.stats).total_points = total;

        let main_pb = self.multi.add(indicatif::ProgressBar::new(total as u64));
        if let Ok(style) = indicatif::ProgressStyle::default_bar()
            .template("   {bar:40.cyan/blue} {pos}/{len} points {msg}")
        {
            main_pb.set_style(style.progress_chars("█▓▒░  "));
        }
        *self
            .main_progress
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(main_pb);
    }

    fn update_point(&self, pid: &str, status: PointStatus) {
        write(&self.stats).record(&status);
        match status {
            PointStatus::Processing => {
                self.with_main_progress(|main_pb| main_pb.set_message(format!("⚙️  {pid}")));
            }
            PointStatus::Done => self.with_main_progress(|main_pb| main_pb.inc(1)),
            PointStatus::Failed(ref e) => {
                self.multi.println(format!("   ✗ {pid}: {e}")).ok();
                self.with_main_progress(|main_pb| main_pb.inc(1));
            }
        }
    }

    fn finish(&self, status_counts: &IndexMap<String, usize>) {
        self.with_main_progress(|main_pb| main_pb.finish_and_clear());
        self.phase_bar.finish_and_clear();
        read(&self.stats).print_summary(status_counts);
    }
}

/// Create an appropriate reporter based on terminal capabilities.
pub fn create_reporter() -> Arc<dyn ProgressReporter> {
    if console::Term::stderr().is_term() {
        Arc::new(FancyReporter::new())
    } else {
        Arc::new(SimpleReporter::new())
    }
}
