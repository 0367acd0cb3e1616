use thiserror::Error;

/// Errors raised while assembling or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or inconsistent wiring; fatal at startup.
    #[error("pipeline configuration error: {0}")]
    Configuration(String),

    /// Fatal response-stage configuration (e.g. unknown matrix cell).
    #[error(transparent)]
    Response(#[from] vigil_response::ResponseError),

    #[error("bus error: {0}")]
    Bus(#[from] vigil_bus::BusError),

    #[error("detection error: {0}")]
    Detection(#[from] vigil_detect::DetectError),
}
