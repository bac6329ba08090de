use crate::error::Result;
use crate::fetch::Fetch;
use crate::record::Serializer;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Per-submission lifecycle. `Failed` is terminal and reachable from
/// `Fetching` or `Serializing`; everything else advances in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Fetching,
    Serializing,
    Done,
    Failed,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Fetching => "fetching",
            Stage::Serializing => "serializing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    CompletedWithNoResults,
}

/// What happened to every selected submission, collected for the end-of-run
/// summary. Per-item failures live here instead of propagating.
#[derive(Debug, Default)]
pub struct RunReport {
    pub done: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        if self.done.is_empty() {
            RunOutcome::CompletedWithNoResults
        } else {
            RunOutcome::Completed
        }
    }

    pub fn record_failure(&mut self, id: &str, reason: String) {
        self.failed.push((id.to_string(), reason));
    }
}

/// Sequences fetch and serialize per submission, strictly one at a time and
/// in selector order. One submission failing never halts the run; only fatal
/// errors (auth) escape.
pub struct Archiver<'a, F: Fetch> {
    fetcher: &'a F,
    serializer: &'a Serializer,
    quiet: bool,
}

impl<'a, F: Fetch> Archiver<'a, F> {
    pub fn new(fetcher: &'a F, serializer: &'a Serializer, quiet: bool) -> Self {
        Archiver {
            fetcher,
            serializer,
            quiet,
        }
    }

    pub async fn run(&self, ids: &[String]) -> Result<RunReport> {
        let bar = if self.quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(ids.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {pos}/{len} {wide_msg}")
                    .expect("static progress template")
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        };

        let mut report = RunReport::default();
        for id in ids {
            let stage = self.archive_one(id, &mut report, &bar).await?;
            debug_assert!(matches!(stage, Stage::Done | Stage::Failed));
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(report)
    }

    /// Runs one submission from `Pending` to a terminal stage. Failures
    /// recorded in the report carry the stage they happened in.
    async fn archive_one(
        &self,
        id: &str,
        report: &mut RunReport,
        bar: &ProgressBar,
    ) -> Result<Stage> {
        let stage = self.transition(id, Stage::Pending, Stage::Fetching, bar);
        let fetched = match self.fetcher.fetch(id).await {
            Ok(fetched) => fetched,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(id, "{e}");
                report.record_failure(id, format!("failed while {}: {e}", stage.label()));
                return Ok(self.transition(id, stage, Stage::Failed, bar));
            }
        };

        let stage = self.transition(id, stage, Stage::Serializing, bar);
        match self.serializer.serialize(&fetched).await {
            Ok(path) => {
                tracing::info!(id, path = %path.display(), "archived");
                report.done.push(id.to_string());
                Ok(self.transition(id, stage, Stage::Done, bar))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(id, "{e}");
                report.record_failure(id, format!("failed while {}: {e}", stage.label()));
                Ok(self.transition(id, stage, Stage::Failed, bar))
            }
        }
    }

    fn transition(&self, id: &str, from: Stage, to: Stage, bar: &ProgressBar) -> Stage {
        tracing::debug!(id, from = from.label(), to = to.label(), "stage");
        if matches!(to, Stage::Fetching | Stage::Serializing) {
            bar.set_message(format!("{id} — {}", to.label()));
        }
        to
    }
}
