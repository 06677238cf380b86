use thiserror::Error;

/// Terminal conditions of a measurement run.
#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unable to read from video stream: {0}")]
    StreamUnreadable(String),

    #[error("Frame size {found_width}x{found_height} does not match stream size {width}x{height}")]
    FrameMismatch {
        width: u32,
        height: u32,
        found_width: u32,
        found_height: u32,
    },

    #[error("Run aborted after {frames_processed} frames")]
    Aborted { frames_processed: usize },

    #[error("Failed to write output frame: {0}")]
    Sink(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl MotionError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        MotionError::InvalidConfig(msg.into())
    }
}

pub type MotionResult<T> = std::result::Result<T, MotionError>;
