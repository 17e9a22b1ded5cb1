use crate::acquire::{self, ImageSource};
use crate::error::{PipelineError, PipelineResult};
use crate::lang::{self, ResolvedLanguage};
use inference::{CaptionModel, TranslationModel};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    /// English caption produced by the captioning model, trimmed.
    pub caption: String,
    /// Caption translated into the resolved target language. Empty
    /// when the caption itself came back empty.
    pub translation: String,
    pub language: ResolvedLanguage,
}

/// Composes image acquisition, captioning and translation.
///
/// Both models are loaded once at startup and shared read-only; the
/// pipeline itself is stateless and cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    captioner: Arc<dyn CaptionModel>,
    translator: Arc<dyn TranslationModel>,
}

impl Pipeline {
    pub fn new(captioner: Arc<dyn CaptionModel>, translator: Arc<dyn TranslationModel>) -> Self {
        Self {
            captioner,
            translator,
        }
    }

    /// Run the full caption-and-translate sequence for one request.
    ///
    /// Fail-fast: the first stage error aborts the run and no partial
    /// result is returned. The translator is only invoked after the
    /// captioner has succeeded.
    #[tracing::instrument(name = "Pipeline::run", skip(self, source), err(Debug))]
    pub async fn run(&self, source: ImageSource, language: &str) -> PipelineResult<PipelineOutput> {
        let image = acquire::acquire(source).await?;

        let caption = self
            .captioner
            .caption(&image)
            .await
            .map_err(PipelineError::Inference)?;
        drop(image);
        let caption = caption.trim().to_string();

        let language = lang::resolve(language);
        if language.fallback {
            debug!(code = language.code, "unknown language name, using fallback");
        }

        // An empty caption carries nothing worth translating; skip
        // the second model call rather than feeding it an empty
        // string.
        if caption.is_empty() {
            debug!("captioner produced no content tokens, skipping translation");
            return Ok(PipelineOutput {
                caption,
                translation: String::new(),
                language,
            });
        }

        let translation = self
            .translator
            .translate(&caption, lang::SOURCE_LANG, language.code)
            .await
            .map_err(PipelineError::Inference)?;

        debug!(caption = %caption, code = language.code, "pipeline run complete");

        Ok(PipelineOutput {
            caption,
            translation,
            language,
        })
    }

    pub async fn run_upload(
        &self,
        bytes: Vec<u8>,
        language: &str,
    ) -> PipelineResult<PipelineOutput> {
        self.run(ImageSource::Upload(bytes), language).await
    }

    pub async fn run_url(
        &self,
        url: impl Into<String>,
        language: &str,
    ) -> PipelineResult<PipelineOutput> {
        self.run(ImageSource::Url(url.into()), language).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::RgbImage;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct FixedCaption {
        text: &'static str,
        calls: AtomicUsize,
    }

    impl FixedCaption {
        fn new(text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                text,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CaptionModel for FixedCaption {
        async fn caption(&self, _image: &RgbImage) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
    }

    #[derive(Default)]
    struct RecordingTranslator {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl TranslationModel for RecordingTranslator {
        async fn translate(
            &self,
            text: &str,
            source_lang: &str,
            target_lang: &str,
        ) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push((
                text.to_string(),
                source_lang.to_string(),
                target_lang.to_string(),
            ));
            Ok(format!("[{target_lang}] {text}"))
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(2, 2, image::Rgb([80, 160, 40]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn pipeline(
        captioner: Arc<FixedCaption>,
        translator: Arc<RecordingTranslator>,
    ) -> Pipeline {
        Pipeline::new(captioner, translator)
    }

    #[test_log::test(tokio::test)]
    async fn test_run_upload_trims_caption() {
        let captioner = FixedCaption::new("  a dog sitting in the grass \n");
        let translator = Arc::new(RecordingTranslator::default());
        let p = pipeline(captioner, translator.clone());

        let output = p.run_upload(png_bytes(), "Hindi").await.unwrap();

        assert_eq!(output.caption, "a dog sitting in the grass");
        assert_eq!(output.translation, "[hi] a dog sitting in the grass");
        assert_eq!(output.language.code, "hi");
        assert!(!output.language.fallback);

        let calls = translator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "en");
        assert_eq!(calls[0].2, "hi");
    }

    #[test_log::test(tokio::test)]
    async fn test_run_is_deterministic() {
        let captioner = FixedCaption::new("a red bus on a street");
        let translator = Arc::new(RecordingTranslator::default());
        let p = pipeline(captioner, translator);

        let first = p.run_upload(png_bytes(), "Tamil").await.unwrap();
        let second = p.run_upload(png_bytes(), "Tamil").await.unwrap();

        assert_eq!(first.caption, second.caption);
        assert_eq!(first.translation, second.translation);
        assert_eq!(first.language, second.language);
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_language_falls_back_to_hindi() {
        let captioner = FixedCaption::new("a cat on a sofa");
        let translator = Arc::new(RecordingTranslator::default());
        let p = pipeline(captioner, translator.clone());

        let output = p.run_upload(png_bytes(), "French").await.unwrap();

        assert_eq!(output.language.code, "hi");
        assert!(output.language.fallback);
        assert_eq!(translator.calls.lock().unwrap()[0].2, "hi");
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_upload_bytes_skip_models() {
        let captioner = FixedCaption::new("unused");
        let translator = Arc::new(RecordingTranslator::default());
        let p = pipeline(captioner.clone(), translator.clone());

        let result = p.run_upload(b"not an image".to_vec(), "Hindi").await;

        assert!(matches!(result, Err(PipelineError::Decode(_))));
        assert_eq!(captioner.calls.load(Ordering::SeqCst), 0);
        assert!(translator.calls.lock().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_unreachable_url_skips_models() {
        let captioner = FixedCaption::new("unused");
        let translator = Arc::new(RecordingTranslator::default());
        let p = pipeline(captioner.clone(), translator.clone());

        let result = p.run_url("http://127.0.0.1:9/dog.jpg", "Hindi").await;

        assert!(matches!(result, Err(PipelineError::Fetch(_))));
        assert_eq!(captioner.calls.load(Ordering::SeqCst), 0);
        assert!(translator.calls.lock().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_url_404_fails_with_fetch_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        let captioner = FixedCaption::new("unused");
        let translator = Arc::new(RecordingTranslator::default());
        let p = pipeline(captioner.clone(), translator.clone());

        let result = p.run_url(format!("http://{addr}/missing.jpg"), "Hindi").await;

        assert!(matches!(result, Err(PipelineError::Fetch(_))));
        assert_eq!(captioner.calls.load(Ordering::SeqCst), 0);
        assert!(translator.calls.lock().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_caption_skips_translation() {
        let captioner = FixedCaption::new("   \n");
        let translator = Arc::new(RecordingTranslator::default());
        let p = pipeline(captioner, translator.clone());

        let output = p.run_upload(png_bytes(), "Hindi").await.unwrap();

        assert_eq!(output.caption, "");
        assert_eq!(output.translation, "");
        assert!(translator.calls.lock().unwrap().is_empty());
    }
}
