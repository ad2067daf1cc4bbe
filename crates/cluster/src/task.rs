use super::node::Trigger;

/// Error type for work function execution.
///
/// The scheduler never acts on these; failures are logged and counted in
/// the node and worker statistics, then dropped.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Work failed: {0}")]
    Failed(String),
    #[error("Work skipped: {0}")]
    Skipped(String),
}

/// The work a node performs each time a worker runs it.
///
/// Implementations typically drive one codec channel: pull pending input,
/// program the hardware, collect output. The [`Trigger`] lets the work
/// reschedule its own node, e.g. when more input is already waiting.
///
/// Closures of the shape `FnMut(&Trigger) -> Result<(), WorkError>`
/// implement this trait.
pub trait Work: Send {
    /// Run one step of work.
    fn run(&mut self, trigger: &Trigger) -> Result<(), WorkError>;
}

impl<F> Work for F
where
    F: FnMut(&Trigger) -> Result<(), WorkError> + Send,
{
    fn run(&mut self, trigger: &Trigger) -> Result<(), WorkError> {
        self(trigger)
    }
}
