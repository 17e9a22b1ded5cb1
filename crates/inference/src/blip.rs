use crate::traits::CaptionModel;
use anyhow::anyhow;
use async_trait::async_trait;
use candle_core::{Device, Tensor, D};
use candle_transformers::models::blip::VisionConfig;
use candle_transformers::models::quantized_blip;
use candle_transformers::models::{blip, blip_text};
use image::RgbImage;
use std::path::Path;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::debug;

const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;
const IMAGE_SIZE: u32 = 384;

// Fixed decoding parameters, no sampling.
const BEAM_WIDTH: usize = 4;
const MAX_NEW_TOKENS: usize = 40;

/// Quantized BLIP conditional-generation captioner.
///
/// The text decoder keeps a kv cache between forward calls, so the
/// model sits behind a mutex and every decode step works on the full
/// token prefix with a freshly reset cache. That keeps beam search
/// correct and serializes concurrent callers on the shared weights.
pub struct Blip {
    tokenizer: Tokenizer,
    model: Mutex<quantized_blip::BlipForConditionalGeneration>,
    device: Device,
}

fn blip_base_config() -> blip::Config {
    let text_config = blip_text::Config {
        vocab_size: 30524,
        hidden_size: 768,
        encoder_hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 768,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        max_position_embeddings: 512,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-12,
        is_decoder: true,
    };
    let vision_config = VisionConfig {
        hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 512,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        image_size: 384,
        patch_size: 16,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-5,
    };

    blip::Config {
        text_config,
        vision_config,
        projection_dim: 512,
        image_text_hidden_size: 256,
    }
}

struct Beam {
    tokens: Vec<u32>,
    score: f32,
    done: bool,
}

impl Blip {
    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
    ) -> anyhow::Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|_| anyhow!("failed to initialize tokenizer"))?;

        let device = Device::cuda_if_available(0)?;

        let vb = quantized_blip::VarBuilder::from_gguf(model_path, &device)?;
        let model = quantized_blip::BlipForConditionalGeneration::new(&blip_base_config(), vb)?;

        Ok(Self {
            tokenizer,
            model: Mutex::new(model),
            device,
        })
    }

    /// Resize to 384x384, RGB, CLIP mean/std normalization, CHW f32.
    fn preprocess(&self, image: &RgbImage) -> candle_core::Result<Tensor> {
        let img = image::DynamicImage::ImageRgb8(image.clone()).resize_to_fill(
            IMAGE_SIZE,
            IMAGE_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let data = img.to_rgb8().into_raw();
        let data = Tensor::from_vec(
            data,
            (IMAGE_SIZE as usize, IMAGE_SIZE as usize, 3),
            &Device::Cpu,
        )?
        .permute((2, 0, 1))?;
        let mean = Tensor::new(&[0.48145466f32, 0.4578275, 0.40821073], &Device::Cpu)?
            .reshape((3, 1, 1))?;
        let std = Tensor::new(&[0.26862954f32, 0.261_302_6, 0.275_777_1], &Device::Cpu)?
            .reshape((3, 1, 1))?;
        (data.to_dtype(candle_core::DType::F32)? / 255.)?
            .broadcast_sub(&mean)?
            .broadcast_div(&std)
    }

    /// Log-probabilities over the vocabulary for the next token of
    /// `tokens`, recomputed from scratch against `image_embeds`.
    fn next_token_log_probs(
        &self,
        model: &mut quantized_blip::BlipForConditionalGeneration,
        image_embeds: &Tensor,
        tokens: &[u32],
    ) -> anyhow::Result<Vec<f32>> {
        model.text_decoder().reset_kv_cache();
        let input_ids = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = model.text_decoder().forward(&input_ids, image_embeds)?;
        let logits = logits.squeeze(0)?;
        let logits = logits.get(logits.dim(0)? - 1)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        Ok(log_probs.to_vec1::<f32>()?)
    }

    /// Beam search with a fixed width and a bounded number of
    /// generated tokens. No sampling is involved, so the result is
    /// reproducible for fixed weights and a fixed input image.
    fn beam_search(
        &self,
        model: &mut quantized_blip::BlipForConditionalGeneration,
        image_embeds: &Tensor,
    ) -> anyhow::Result<Vec<u32>> {
        let mut beams = vec![Beam {
            tokens: vec![BOS_TOKEN_ID],
            score: 0.0,
            done: false,
        }];

        for _step in 0..MAX_NEW_TOKENS {
            if beams.iter().all(|b| b.done) {
                break;
            }

            let mut candidates: Vec<Beam> = vec![];
            for beam in &beams {
                if beam.done {
                    // finished beams compete unchanged
                    candidates.push(Beam {
                        tokens: beam.tokens.clone(),
                        score: beam.score,
                        done: true,
                    });
                    continue;
                }

                let log_probs =
                    self.next_token_log_probs(model, image_embeds, &beam.tokens)?;
                let mut ranked: Vec<(usize, f32)> =
                    log_probs.into_iter().enumerate().collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

                for (token, log_prob) in ranked.into_iter().take(BEAM_WIDTH) {
                    let token = token as u32;
                    let mut tokens = beam.tokens.clone();
                    tokens.push(token);
                    candidates.push(Beam {
                        tokens,
                        score: beam.score + log_prob,
                        done: token == SEP_TOKEN_ID,
                    });
                }
            }

            candidates.sort_by(|a, b| {
                let a_len = (a.tokens.len() - 1) as f32;
                let b_len = (b.tokens.len() - 1) as f32;
                (b.score / b_len).total_cmp(&(a.score / a_len))
            });
            candidates.truncate(BEAM_WIDTH);
            beams = candidates;
        }

        let best = beams
            .into_iter()
            .max_by(|a, b| {
                let a_len = (a.tokens.len() - 1) as f32;
                let b_len = (b.tokens.len() - 1) as f32;
                (a.score / a_len).total_cmp(&(b.score / b_len))
            })
            .ok_or_else(|| anyhow!("beam search produced no candidates"))?;

        Ok(best.tokens)
    }
}

#[async_trait]
impl CaptionModel for Blip {
    async fn caption(&self, image: &RgbImage) -> anyhow::Result<String> {
        debug!(
            width = image.width(),
            height = image.height(),
            "generating caption"
        );
        let pixel_values = self.preprocess(image)?.to_device(&self.device)?;

        let mut model = self.model.lock().await;
        let image_embeds = pixel_values.unsqueeze(0)?.apply(model.vision_model())?;
        let token_ids = self.beam_search(&mut model, &image_embeds)?;
        drop(model);

        self.tokenizer
            .decode(&token_ids, true)
            .map_err(|_| anyhow!("failed to decode caption tokens"))
    }
}

#[test_log::test(tokio::test)]
async fn test_blip_caption() {
    use crate::traits::CaptionModel;

    // needs BLIP weights on disk, see README
    let Ok(dir) = std::env::var("INFERENCE_RESOURCES_DIR") else {
        return;
    };
    let dir = std::path::PathBuf::from(dir);

    let blip = Blip::new(
        dir.join("blip/blip-image-captioning-base-q4k.gguf"),
        dir.join("blip/tokenizer.json"),
    )
    .expect("load blip");

    let image = image::open(dir.join("fixtures/dog.jpg"))
        .expect("open fixture")
        .to_rgb8();

    let caption = blip.caption(&image).await.expect("caption");
    tracing::info!("caption: {caption}");
    assert!(!caption.trim().is_empty());
    assert_eq!(caption, caption.trim());
}
