use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Network failure or non-success HTTP status while fetching a
    /// remote image.
    #[error("failed to fetch image: {0}")]
    Fetch(#[from] reqwest::Error),

    /// The supplied or fetched bytes are not a valid image payload.
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// The captioning or translation model call failed.
    #[error("inference failed: {0}")]
    Inference(anyhow::Error),
}
