//! Progress reporting through the log

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};
use xvdkit_stream::ProgressReporter;

/// Percentage step between progress lines
const REPORT_STEP: u64 = 10;

#[derive(Debug)]
struct Task {
    label: String,
    total: u64,
    done: u64,
    next_percent: u64,
}

impl Task {
    fn percent(&self) -> u64 {
        if self.total == 0 {
            100
        } else {
            self.done.min(self.total).saturating_mul(100) / self.total
        }
    }
}

/// Logs a line per task every ten percent
#[derive(Debug, Default)]
pub struct LogProgress {
    tasks: Mutex<HashMap<u32, Task>>,
}

impl LogProgress {
    /// Create a reporter with no tasks
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for LogProgress {
    fn started(&self, task: u32, label: &str, total: u64) {
        debug!("{label}: 0x{total:x} bytes");
        self.tasks.lock().insert(
            task,
            Task {
                label: label.to_string(),
                total,
                done: 0,
                next_percent: REPORT_STEP,
            },
        );
    }

    fn advanced(&self, task: u32, bytes: u64) {
        let mut tasks = self.tasks.lock();
        let Some(entry) = tasks.get_mut(&task) else {
            return;
        };
        entry.done = entry.done.saturating_add(bytes);

        let percent = entry.percent();
        if percent >= entry.next_percent && percent < 100 {
            info!("{}: {percent}%", entry.label);
            entry.next_percent = (percent / REPORT_STEP + 1) * REPORT_STEP;
        }
    }

    fn finished(&self, task: u32) {
        if let Some(entry) = self.tasks.lock().remove(&task) {
            info!("{}: done", entry.label);
        }
    }
}
