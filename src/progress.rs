//! Progress reporting and display for drivesync
//!
//! The upload driver publishes [`ProgressEvent`]s through a
//! [`ProgressReporter`]; the CLI renders them with [`ProgressTracker`].

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One progress observation for a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    /// Acknowledged fraction in `[0, 1]`
    pub fraction: f64,
    /// Payload bytes acknowledged so far
    pub acknowledged: u64,
    /// Payload bytes the session will transmit
    pub total: u64,
}

/// Publishes a non-decreasing progress fraction to an optional observer
#[derive(Debug, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    last: Mutex<f64>,
}

impl ProgressReporter {
    /// Reporter that publishes into `tx`
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            tx: Some(tx),
            last: Mutex::new(0.0),
        }
    }

    /// Reporter plus the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Reporter with no observer
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Last published fraction
    pub fn fraction(&self) -> f64 {
        *self.last.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Publish `acknowledged` of `total` bytes.
    ///
    /// Values below the last published fraction are dropped so observers
    /// never see progress move backwards. A zero total counts as complete.
    pub fn report(&self, acknowledged: u64, total: u64) {
        let fraction = if total == 0 {
            1.0
        } else {
            (acknowledged as f64 / total as f64).clamp(0.0, 1.0)
        };

        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if fraction < *last {
            return;
        }
        *last = fraction;

        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is watching
            let _ = tx.send(ProgressEvent {
                fraction,
                acknowledged,
                total,
            });
        }
    }
}

/// Terminal progress bar for a single upload
pub struct ProgressTracker {
    bar: ProgressBar,
    enabled: bool,
}

impl ProgressTracker {
    /// Create a new progress tracker
    pub fn new(enabled: bool) -> Self {
        let bar = if enabled {
            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {msg:.dim} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::hidden()
        };

        Self { bar, enabled }
    }

    /// Start tracking an upload of `name`
    pub fn start(&self, name: &str) {
        self.bar.set_position(0);
        self.bar.set_message(truncate_filename(name, 30));
    }

    /// Apply one progress event
    pub fn update(&self, event: &ProgressEvent) {
        self.bar.set_length(event.total);
        self.bar.set_position(event.acknowledged);
    }

    /// Render events until the reporter side is dropped
    pub async fn follow(&self, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
        while let Some(event) = rx.recv().await {
            self.update(&event);
        }
    }

    /// Finish the progress bar
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Print a message (works with progress bars)
    pub fn println(&self, msg: &str) {
        if self.enabled {
            self.bar.println(msg);
        } else {
            println!("{}", msg);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Truncate a filename for display
fn truncate_filename(name: &str, max_len: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= max_len {
        name.to_string()
    } else {
        let tail: String = chars[chars.len() - (max_len - 3)..].iter().collect();
        format!("...{}", tail)
    }
}
