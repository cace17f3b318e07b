use log::{error, info, warn};

/// How many failure samples are kept (and logged as they happen) per stage.
/// Everything past the cap is still counted.
pub const MAX_FAILURE_SAMPLES: usize = 5;

/// Per-stage accounting for one load stage (airports, airlines or routes).
///
/// Row-level and batch-level failures are recorded here instead of being
/// propagated as errors; only stage-fatal conditions (unreadable input file)
/// end up in `fatal`.
#[derive(Debug)]
pub struct StageReport {
    pub stage: &'static str,
    /// Physical rows seen in the input file, including malformed ones.
    pub rows_read: usize,
    /// Rows dropped because they did not match the column layout.
    pub rows_skipped: usize,
    /// Rows dropped or degraded by type coercion / semantic checks.
    pub row_errors: usize,
    /// Records that survived parsing and were handed to the batch client.
    pub rows_loadable: usize,
    pub batches_attempted: usize,
    pub batches_failed: usize,
    /// Rows submitted to the database across all batches.
    pub rows_attempted: usize,
    /// Rows belonging to batches that the database rejected.
    pub rows_failed: usize,
    pub fatal: Option<String>,
    samples: Vec<String>,
}

impl StageReport {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            rows_read: 0,
            rows_skipped: 0,
            row_errors: 0,
            rows_loadable: 0,
            batches_attempted: 0,
            batches_failed: 0,
            rows_attempted: 0,
            rows_failed: 0,
            fatal: None,
            samples: Vec::new(),
        }
    }

    /// A row that could not be split into the expected columns.
    pub fn record_skipped(&mut self, row: u64, reason: impl std::fmt::Display) {
        self.rows_skipped += 1;
        self.push_sample(format!("row {}: skipped: {}", row, reason));
    }

    /// A row that failed coercion or a semantic check.
    pub fn record_row_error(&mut self, row: u64, reason: impl std::fmt::Display) {
        self.row_errors += 1;
        self.push_sample(format!("row {}: {}", row, reason));
    }

    /// A whole batch the database rejected. `first_row` is the 1-based
    /// position of the batch's first record among the loadable records.
    pub fn record_batch_failure(
        &mut self,
        batch: usize,
        first_row: usize,
        batch_len: usize,
        reason: impl std::fmt::Display,
    ) {
        self.batches_failed += 1;
        self.rows_failed += batch_len;
        self.push_sample(format!(
            "batch {} (records {}..={}): {}",
            batch,
            first_row,
            first_row + batch_len - 1,
            reason
        ));
    }

    pub fn set_fatal(&mut self, err: &anyhow::Error) {
        self.fatal = Some(format!("{:#}", err));
    }

    /// Rows that made it into a committed batch.
    pub fn rows_written(&self) -> usize {
        self.rows_attempted - self.rows_failed
    }

    fn push_sample(&mut self, sample: String) {
        if self.samples.len() < MAX_FAILURE_SAMPLES {
            warn!("⚠️ [{}] {}", self.stage, sample);
            self.samples.push(sample);
        }
    }
}

/// Accumulated reports for the whole run, printed as the final summary.
#[derive(Debug, Default)]
pub struct RunSummary {
    stages: Vec<StageReport>,
}

impl RunSummary {
    pub fn push(&mut self, report: StageReport) {
        self.stages.push(report);
    }

    pub fn has_fatal(&self) -> bool {
        self.stages.iter().any(|s| s.fatal.is_some())
    }

    /// Print the per-stage summary table and the first failure samples.
    /// This runs on every path that reaches the data stages, even when
    /// batches failed along the way.
    pub fn log_table(&self) {
        info!("📊 Run summary:");
        info!(
            "  {:<10} {:>9} {:>8} {:>8} {:>8} {:>9} {:>9} {:>8}",
            "stage", "read", "skipped", "row_err", "batches", "bat_fail", "written", "failed"
        );
        for s in &self.stages {
            info!(
                "  {:<10} {:>9} {:>8} {:>8} {:>8} {:>9} {:>9} {:>8}",
                s.stage,
                s.rows_read,
                s.rows_skipped,
                s.row_errors,
                s.batches_attempted,
                s.batches_failed,
                s.rows_written(),
                s.rows_failed
            );
        }
        for s in &self.stages {
            if let Some(fatal) = &s.fatal {
                error!("❌ [{}] stage failed: {}", s.stage, fatal);
            }
            if !s.samples.is_empty() {
                info!("  First failures for {}:", s.stage);
                for sample in &s.samples {
                    info!("    {}", sample);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_are_capped_but_counts_keep_growing() {
        let mut report = StageReport::new("airports");
        for row in 0..20 {
            report.record_row_error(row, "bad value");
        }
        assert_eq!(report.row_errors, 20);
        assert_eq!(report.samples.len(), MAX_FAILURE_SAMPLES);
    }

    #[test]
    fn skipped_and_errored_rows_are_tracked_separately() {
        let mut report = StageReport::new("routes");
        report.record_skipped(3, "found 8 fields, expected 9");
        report.record_row_error(4, "src_id \"abc\" is not an integer");
        assert_eq!(report.rows_skipped, 1);
        assert_eq!(report.row_errors, 1);
    }

    #[test]
    fn every_third_batch_rejected_is_counted_not_fatal() {
        // Batch size 1, database rejects every third write.
        let mut report = StageReport::new("airlines");
        for batch in 0..9 {
            report.batches_attempted += 1;
            report.rows_attempted += 1;
            if batch % 3 == 2 {
                report.record_batch_failure(batch, batch + 1, 1, "constraint violation");
            }
        }
        assert_eq!(report.batches_attempted, 9);
        assert_eq!(report.batches_failed, 3);
        assert_eq!(report.rows_failed, 3);
        assert_eq!(report.rows_written(), 6);
        assert!(report.fatal.is_none());
    }

    #[test]
    fn batch_failure_sample_names_the_record_range() {
        let mut report = StageReport::new("airports");
        report.record_batch_failure(2, 2001, 1000, "connection reset");
        assert_eq!(report.samples.len(), 1);
        assert!(report.samples[0].contains("records 2001..=3000"));
    }

    #[test]
    fn summary_reports_fatal_stages() {
        let mut summary = RunSummary::default();
        let mut ok = StageReport::new("airports");
        ok.rows_read = 10;
        summary.push(ok);
        let mut bad = StageReport::new("airlines");
        bad.set_fatal(&anyhow::anyhow!("cannot open airlines file"));
        summary.push(bad);
        assert!(summary.has_fatal());
        assert_eq!(summary.stages.len(), 2);
    }
}
