use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or tearing down a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A caller-fed pipeline was closed with a polled egress but no stages
    #[error("cannot build a pipeline with no stages")]
    NoStages,

    /// A worker thread could not be spawned during construction.
    /// Every worker spawned before the failure has already been joined.
    #[error("failed to spawn worker thread for stage {stage}")]
    Spawn {
        stage: usize,
        #[source]
        source: std::io::Error,
    },

    /// A stage function panicked while the pipeline was running
    #[error("stage {stage} panicked while processing")]
    StagePanicked { stage: usize },
}
