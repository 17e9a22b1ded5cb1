use async_trait::async_trait;
use image::RgbImage;

/// An image-to-text sequence generator.
///
/// Implementations are loaded once at startup and are immutable
/// afterwards, so a single instance can be shared behind an `Arc`
/// across the whole process. Output is English text with model
/// control tokens already stripped.
#[async_trait]
pub trait CaptionModel: Send + Sync {
    async fn caption(&self, image: &RgbImage) -> anyhow::Result<String>;
}
