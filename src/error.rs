use thiserror::Error;

/// All errors generated by the streaming core.
///
/// None of these are fatal to the pipeline: malformed events are dropped, a
/// failed wake degrades the scheduler to idle, and channel errors surface to
/// the caller that issued the command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("malformed event {id}: {reason}")]
    MalformedEvent { id: String, reason: &'static str },

    #[error("unable to arm scheduler wake {delay_ms}ms ahead")]
    WakeUnavailable { delay_ms: u64 },

    #[error("event source channel closed")]
    SourceClosed,

    #[error("stream core has shut down")]
    CoreClosed,

    #[error("command rejected: {capacity} commands already queued while source is not ready")]
    CommandQueueFull { capacity: usize },
}
