use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
pub enum SafetyGuardError {
    #[error(transparent)]
    FfmpegError(#[from] ffmpeg_next::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    ImageError(#[from] image::ImageError),

    #[error(transparent)]
    FontError(#[from] ab_glyph::InvalidFont),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    PdfError(#[from] genpdf::error::Error),

    #[error("Camera error: {0}")]
    CameraError(String),

    #[error("Speech synthesis failed: {0}")]
    SpeechError(String),

    #[error("Report generation failed: {0}")]
    ReportError(String),

    #[error("Some other error: {0}")]
    Other(String),
}

impl SafetyGuardError {
    /// Flattens the error into a cloneable variant so it can be sent over a
    /// oneshot channel and still be returned to the caller.
    pub fn clone_for_error_reporting(&self) -> Self {
        SafetyGuardError::Other(self.to_string())
    }
}
