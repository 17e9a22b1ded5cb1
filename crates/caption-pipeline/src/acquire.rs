use crate::error::PipelineResult;
use image::RgbImage;
use std::io::Cursor;
use tracing::debug;

/// Where a pipeline run gets its image from. Exactly one source per
/// request.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Encoded image bytes handed over by an upload widget.
    Upload(Vec<u8>),
    /// Remote image fetched over HTTP(S).
    Url(String),
}

/// Resolve a source into an in-memory image normalized to RGB8.
///
/// Fetches are blocking for the request with no timeout and no
/// retries; retry policy belongs to the caller.
pub async fn acquire(source: ImageSource) -> PipelineResult<RgbImage> {
    match source {
        ImageSource::Upload(bytes) => decode_rgb(&bytes),
        ImageSource::Url(url) => {
            debug!(url = %url, "fetching remote image");
            let response = reqwest::get(&url).await?.error_for_status()?;
            let bytes = response.bytes().await?;
            decode_rgb(&bytes)
        }
    }
}

fn decode_rgb(bytes: &[u8]) -> PipelineResult<RgbImage> {
    let image = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .decode()?;
    Ok(image.to_rgb8())
}
