//! Upload progress on stderr.
//!
//! stdout carries the sync summary and answers, so every reporter here writes
//! to stderr only.

use std::io::Write;

/// How a single upload ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileOutcome {
    Uploaded,
    Failed,
}

impl FileOutcome {
    fn as_str(self) -> &'static str {
        match self {
            FileOutcome::Uploaded => "uploaded",
            FileOutcome::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Listing the remote store before planning.
    Discovering { store_id: String },
    /// Upload `n` of `total` finished; `file` is the one that just did.
    Uploading {
        file: String,
        outcome: FileOutcome,
        n: u64,
        total: u64,
    },
    /// All uploads settled.
    Finished { uploaded: u64, failed: u64 },
}

pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// `[ 3/12] uploaded  reports/q3.pdf`
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match event {
            SyncProgressEvent::Discovering { store_id } => {
                format!("listing vector store {}...", store_id)
            }
            SyncProgressEvent::Uploading {
                file,
                outcome,
                n,
                total,
            } => {
                let width = total.to_string().len();
                format!(
                    "[{:>width$}/{}] {:<9} {}",
                    n,
                    total,
                    outcome.as_str(),
                    file,
                    width = width
                )
            }
            SyncProgressEvent::Finished { uploaded, failed } if failed > 0 => {
                format!("done: {} uploaded, {} failed", uploaded, failed)
            }
            SyncProgressEvent::Finished { uploaded, .. } => {
                format!("done: {} uploaded", uploaded)
            }
        };
        let _ = writeln!(std::io::stderr().lock(), "{}", line);
    }
}

/// One JSON object per line, for wrappers that parse progress.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match event {
            SyncProgressEvent::Discovering { store_id } => serde_json::json!({
                "event": "discovering",
                "store_id": store_id,
            }),
            SyncProgressEvent::Uploading {
                file,
                outcome,
                n,
                total,
            } => serde_json::json!({
                "event": "upload",
                "file": file,
                "outcome": outcome.as_str(),
                "n": n,
                "total": total,
            }),
            SyncProgressEvent::Finished { uploaded, failed } => serde_json::json!({
                "event": "finished",
                "uploaded": uploaded,
                "failed": failed,
            }),
        };
        let _ = writeln!(std::io::stderr().lock(), "{}", obj);
    }
}

/// Reporter for `--progress off`: every event is dropped.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// `--progress` values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise none.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<SyncProgressEvent>>);

    impl SyncProgressReporter for Recorder {
        fn report(&self, event: SyncProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn reporters_are_object_safe() {
        let recorder = Recorder::default();
        let reporter: &dyn SyncProgressReporter = &recorder;
        reporter.report(SyncProgressEvent::Finished {
            uploaded: 2,
            failed: 0,
        });
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(FileOutcome::Uploaded.as_str(), "uploaded");
        assert_eq!(FileOutcome::Failed.as_str(), "failed");
    }
}
