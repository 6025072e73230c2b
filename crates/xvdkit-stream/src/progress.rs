//! Progress reporting

/// Receives page-granularity progress from long-running walks
///
/// Task ids are region ids for region walks; whole-file operations use the
/// header id they transform with (0x1) or 0 for plain copies.
pub trait ProgressReporter: Send + Sync {
    /// A task with `total` bytes of work started
    fn started(&self, _task: u32, _label: &str, _total: u64) {}

    /// `bytes` more bytes are done
    fn advanced(&self, _task: u32, _bytes: u64) {}

    /// The task finished
    fn finished(&self, _task: u32) {}
}

/// Reporter that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {}
