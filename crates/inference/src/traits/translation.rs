use async_trait::async_trait;

/// A multilingual sequence-to-sequence generator.
///
/// Source and target languages are explicit per-call parameters
/// rather than state on the model, so concurrent callers can share
/// one instance without one call's language selection leaking into
/// another's.
#[async_trait]
pub trait TranslationModel: Send + Sync {
    /// Translate `text` from `source_lang` into `target_lang`.
    ///
    /// The output language is forced to `target_lang` regardless of
    /// the actual language of `text`. Fails when `target_lang` is not
    /// part of the model's vocabulary.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> anyhow::Result<String>;
}
