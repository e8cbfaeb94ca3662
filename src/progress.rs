use tracing::info;

/// Receives free-text status lines from long-running patch operations.
///
/// Called synchronously on the patching thread.
pub trait ProgressListener {
    fn on_progress(&mut self, message: &str);
}

impl<F: FnMut(&str)> ProgressListener for F {
    fn on_progress(&mut self, message: &str) {
        self(message)
    }
}

/// Forwards status lines to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl ProgressListener for LogListener {
    fn on_progress(&mut self, message: &str) {
        info!("{}", message);
    }
}

/// Discards status lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl ProgressListener for Silent {
    fn on_progress(&mut self, _message: &str) {}
}
