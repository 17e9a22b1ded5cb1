use crate::ort::load_session;
use crate::traits::TranslationModel;
use anyhow::anyhow;
use async_trait::async_trait;
use ndarray::{Array2, Axis};
use ort::Session;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::debug;

// M2M100 generation starts from [eos, target language token]; the
// forced second token pins the output language.
const MAX_DECODE_STEPS: usize = 128;

/// M2M100 multilingual translator over two ONNX sessions (encoder and
/// decoder) exported from the seq2seq checkpoint.
pub struct M2m100 {
    encoder: Session,
    decoder: Session,
    tokenizer: Tokenizer,
    eos_id: u32,
}

impl M2m100 {
    pub fn new(
        encoder_path: impl AsRef<Path>,
        decoder_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
    ) -> anyhow::Result<Self> {
        let encoder = load_session(encoder_path)?;
        let decoder = load_session(decoder_path)?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|_| anyhow!("failed to initialize tokenizer"))?;
        let eos_id = tokenizer
            .token_to_id("</s>")
            .ok_or_else(|| anyhow!("tokenizer has no </s> token"))?;

        Ok(Self {
            encoder,
            decoder,
            tokenizer,
            eos_id,
        })
    }

    /// M2M100 marks languages with `__xx__` vocabulary entries.
    fn lang_token(&self, code: &str) -> anyhow::Result<u32> {
        self.tokenizer
            .token_to_id(&format!("__{code}__"))
            .ok_or_else(|| anyhow!("language code `{code}` is not in the translation vocabulary"))
    }
}

#[async_trait]
impl TranslationModel for M2m100 {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> anyhow::Result<String> {
        let source_token = self.lang_token(source_lang)?;
        let target_token = self.lang_token(target_lang)?;

        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|err| anyhow!(err))?;

        // [__src__, ...text tokens..., </s>]
        let input_ids: Vec<i64> = std::iter::once(source_token)
            .chain(encoding.get_ids().iter().copied())
            .chain(std::iter::once(self.eos_id))
            .map(i64::from)
            .collect();
        let seq_len = input_ids.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), input_ids)?;
        let attention_mask = Array2::<i64>::ones((1, seq_len));

        let encoder_outputs = self.encoder.run(ort::inputs![
            "input_ids" => input_ids.view(),
            "attention_mask" => attention_mask.view(),
        ]?)?;
        let encoder_hidden_states = encoder_outputs
            .get("last_hidden_state")
            .ok_or_else(|| anyhow!("encoder output not found"))?
            .try_extract_tensor::<f32>()?
            .view()
            .to_owned();

        let mut output_ids: Vec<i64> = vec![i64::from(self.eos_id), i64::from(target_token)];

        for _step in 0..MAX_DECODE_STEPS {
            let decoder_input =
                Array2::from_shape_vec((1, output_ids.len()), output_ids.clone())?;

            let decoder_outputs = self.decoder.run(ort::inputs![
                "input_ids" => decoder_input.view(),
                "encoder_attention_mask" => attention_mask.view(),
                "encoder_hidden_states" => encoder_hidden_states.view(),
            ]?)?;
            let logits = decoder_outputs
                .get("logits")
                .ok_or_else(|| anyhow!("decoder output not found"))?
                .try_extract_tensor::<f32>()?
                .view()
                .to_owned();

            // greedy argmax over the last position
            let last = logits
                .index_axis(Axis(0), 0)
                .index_axis(Axis(0), output_ids.len() - 1)
                .to_owned();
            let next = last
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| idx as i64)
                .ok_or_else(|| anyhow!("decoder produced empty logits"))?;

            if next == i64::from(self.eos_id) {
                break;
            }
            output_ids.push(next);
        }

        // drop the decoder-start token and the forced language token
        let generated: Vec<u32> = output_ids[2..].iter().map(|&id| id as u32).collect();
        debug!(
            target = target_lang,
            tokens = generated.len(),
            "translation generated"
        );

        self.tokenizer
            .decode(&generated, true)
            .map_err(|_| anyhow!("failed to decode translation tokens"))
    }
}

#[test_log::test(tokio::test)]
async fn test_m2m100_translate() {
    // needs the exported ONNX encoder/decoder pair, see README
    let Ok(dir) = std::env::var("INFERENCE_RESOURCES_DIR") else {
        return;
    };
    let dir = std::path::PathBuf::from(dir);

    let model = M2m100::new(
        dir.join("m2m100_418M/encoder_model.onnx"),
        dir.join("m2m100_418M/decoder_model.onnx"),
        dir.join("m2m100_418M/tokenizer.json"),
    )
    .expect("load m2m100");

    let hindi = model
        .translate("a dog sitting in the grass", "en", "hi")
        .await
        .expect("translate");
    tracing::info!("translation: {hindi}");
    assert!(!hindi.is_empty());
    // Devanagari block
    assert!(hindi.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c)));
}

#[test_log::test(tokio::test)]
async fn test_m2m100_rejects_unknown_code() {
    let Ok(dir) = std::env::var("INFERENCE_RESOURCES_DIR") else {
        return;
    };
    let dir = std::path::PathBuf::from(dir);

    let model = M2m100::new(
        dir.join("m2m100_418M/encoder_model.onnx"),
        dir.join("m2m100_418M/decoder_model.onnx"),
        dir.join("m2m100_418M/tokenizer.json"),
    )
    .expect("load m2m100");

    let result = model.translate("hello", "en", "xx").await;
    assert!(result.is_err());
}
