use tokio::sync::mpsc::UnboundedSender;

/// Stages of one pipeline invocation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Normalize,
    Deduplicate,
    Batches,
    PostLink,
    Done,
}

/// Incremental status emitted over an optional channel, decoupled from any
/// particular UI transport. Dropping the receiver just makes sends no-ops.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StageStarted {
        stage: PipelineStage,
    },
    BatchCompleted {
        index: usize,
        total: usize,
        inserted: usize,
        updated: usize,
        failed: usize,
    },
}

pub(crate) fn emit(sender: &Option<UnboundedSender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = sender {
        let _ = tx.send(event);
    }
}
