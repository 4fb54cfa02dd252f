//! Persisted preprocessed dataset.
//!
//! Alignment and keypoint extraction run once; the stacked tensors, reference
//! translations and both vocabulary directions are written to one safetensors
//! file and reloaded for training without touching the raw data again.
//!
//! ```text
//! tensors:  body [N,L,50] f32   hands [N,L,84] f32   face [N,L,140] f32
//!           video_mask [N,L] u8   text [N,T] u32   text_mask [N,T] u8
//! metadata: format, translations (JSON list), word2idx, idx2word, special (JSON)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use rayon::prelude::*;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use super::align::{Aligner, read_translation_tables, scan_files};
use super::dataset::{Batch, BatchSource, SampleProvider, SampleTensors};
use super::inspect::{summarize_record, summarize_translations};
use super::vocab::Vocabulary;
use crate::config::{DataConfig, SpecialTokens};
use crate::{Error, Result};

const FORMAT_TAG: &str = "sign-tcr-bundle/1";
const TENSOR_NAMES: [&str; 6] = ["body", "hands", "face", "video_mask", "text", "text_mask"];

/// All samples of a split, stacked and ready for batching.
#[derive(Debug, Clone)]
pub struct PreprocessedBundle {
    pub body: Tensor,
    pub hands: Tensor,
    pub face: Tensor,
    pub video_mask: Tensor,
    pub text: Tensor,
    pub text_mask: Tensor,
    pub translations: Vec<String>,
    pub vocab: Vocabulary,
}

impl PreprocessedBundle {
    /// Materialize every sample of `provider`.
    ///
    /// Samples are built in parallel on the CPU and moved to `device` once stacked.
    pub fn from_provider(provider: &SampleProvider, device: &Device) -> Result<Self> {
        if provider.is_empty() {
            return Err(Error::NoSamples {
                keypoint_files: 0,
                translations: 0,
            });
        }
        tracing::info!("preprocessing {} samples", provider.len());
        let items: Vec<SampleTensors> = (0..provider.len())
            .into_par_iter()
            .map(|i| provider.get(i))
            .collect::<Result<Vec<_>>>()?;
        let batch = Batch::stack(&items)?.to_device(device)?;

        let bundle = Self {
            body: batch.body,
            hands: batch.hands,
            face: batch.face,
            video_mask: batch.video_mask,
            text: batch.text,
            text_mask: batch.text_mask,
            translations: batch.translations,
            vocab: provider.vocab().as_ref().clone(),
        };
        tracing::info!(
            "preprocessed: body {:?} hands {:?} face {:?} text {:?}",
            bundle.body.dims(),
            bundle.hands.dims(),
            bundle.face.dims(),
            bundle.text.dims()
        );
        Ok(bundle)
    }

    /// Build the vocabulary, align and materialize a raw data directory.
    ///
    /// The vocabulary covers the last column of every non-empty table row,
    /// including rows too short to align.
    pub fn from_directory(
        dir: impl AsRef<Path>,
        config: &DataConfig,
        special: &SpecialTokens,
        device: &Device,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let rows = read_translation_tables(dir)?;
        summarize_translations(&rows);
        let corpus: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.last().map(String::as_str))
            .collect();
        let vocab = Vocabulary::build(&corpus, special)?;

        let aligner = Aligner::new(config.id_suffixes.clone());
        let keypoints: Vec<_> = scan_files(dir, "json")?
            .into_iter()
            .map(super::align::KeypointEntry::from_path)
            .collect();
        let (samples, _report) = aligner.align(&keypoints, &rows)?;
        if let Some(first) = samples.first() {
            summarize_record(&first.keypoint_source.load()?);
        }

        let provider = SampleProvider::new(samples, Arc::new(vocab), config.clone(), Device::Cpu);
        Self::from_provider(&provider, device)
    }

    pub fn len(&self) -> usize {
        self.translations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }

    fn tensors(&self) -> [(&'static str, &Tensor); 6] {
        [
            ("body", &self.body),
            ("hands", &self.hands),
            ("face", &self.face),
            ("video_mask", &self.video_mask),
            ("text", &self.text),
            ("text_mask", &self.text_mask),
        ]
    }

    /// Write the bundle as a single safetensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut raw: Vec<(&str, Dtype, Vec<usize>, Vec<u8>)> = Vec::with_capacity(6);
        for (name, tensor) in self.tensors() {
            let (dtype, bytes) = tensor_bytes(tensor)?;
            raw.push((name, dtype, tensor.dims().to_vec(), bytes));
        }
        let mut views: HashMap<String, TensorView<'_>> = HashMap::with_capacity(raw.len());
        for (name, dtype, shape, bytes) in &raw {
            views.insert(name.to_string(), TensorView::new(*dtype, shape.clone(), bytes)?);
        }

        let mut metadata = HashMap::new();
        metadata.insert("format".to_string(), FORMAT_TAG.to_string());
        metadata.insert(
            "translations".to_string(),
            serde_json::to_string(&self.translations)?,
        );
        metadata.insert(
            "word2idx".to_string(),
            serde_json::to_string(&self.vocab.word_to_index())?,
        );
        metadata.insert(
            "idx2word".to_string(),
            serde_json::to_string(&self.vocab.index_to_word())?,
        );
        metadata.insert(
            "special".to_string(),
            serde_json::to_string(self.vocab.special())?,
        );

        safetensors::serialize_to_file(&views, &Some(metadata), path.as_ref())?;
        tracing::info!("saved preprocessed bundle to {:?}", path.as_ref());
        Ok(())
    }

    /// Read a bundle written by [`PreprocessedBundle::save`].
    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let buffer = std::fs::read(path.as_ref())?;
        let (_, header) = SafeTensors::read_metadata(&buffer)?;
        let metadata = header
            .metadata()
            .as_ref()
            .ok_or_else(|| Error::Bundle("missing metadata".to_string()))?;
        let meta = |key: &str| -> Result<&String> {
            metadata
                .get(key)
                .ok_or_else(|| Error::Bundle(format!("missing metadata entry {key:?}")))
        };
        if meta("format")? != FORMAT_TAG {
            return Err(Error::Bundle(format!("unsupported format {:?}", meta("format")?)));
        }

        let translations: Vec<String> = serde_json::from_str(meta("translations")?)?;
        let special: SpecialTokens = serde_json::from_str(meta("special")?)?;
        let idx2word: BTreeMap<u32, String> = serde_json::from_str(meta("idx2word")?)?;
        let word2idx: BTreeMap<String, u32> = serde_json::from_str(meta("word2idx")?)?;
        let vocab = Vocabulary::from_index_map(&idx2word, &special)?;
        if vocab.word_to_index() != word2idx {
            return Err(Error::Bundle("word2idx and idx2word disagree".to_string()));
        }

        let tensors = SafeTensors::deserialize(&buffer)?;
        let mut loaded: HashMap<&str, Tensor> = HashMap::new();
        for name in TENSOR_NAMES {
            let view = tensors.tensor(name)?;
            let dtype = match view.dtype() {
                Dtype::F32 => DType::F32,
                Dtype::U32 => DType::U32,
                Dtype::U8 => DType::U8,
                other => {
                    return Err(Error::Bundle(format!("{name}: unsupported dtype {other:?}")));
                }
            };
            let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), device)?;
            loaded.insert(name, tensor);
        }
        let mut take = |name: &str| {
            loaded
                .remove(name)
                .ok_or_else(|| Error::Bundle(format!("missing tensor {name}")))
        };

        let bundle = Self {
            body: take("body")?,
            hands: take("hands")?,
            face: take("face")?,
            video_mask: take("video_mask")?,
            text: take("text")?,
            text_mask: take("text_mask")?,
            translations,
            vocab,
        };
        for (name, tensor) in bundle.tensors() {
            if tensor.dim(0)? != bundle.len() {
                return Err(Error::Bundle(format!(
                    "{name} has {} rows but {} translations",
                    tensor.dim(0)?,
                    bundle.len()
                )));
            }
        }
        Ok(bundle)
    }
}

impl BatchSource for PreprocessedBundle {
    fn num_samples(&self) -> usize {
        self.len()
    }

    fn batch(&self, indices: &[usize]) -> Result<Batch> {
        let ids: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
        let ids = Tensor::from_vec(ids, indices.len(), self.body.device())?;
        let translations = indices
            .iter()
            .map(|&i| {
                self.translations.get(i).cloned().ok_or_else(|| {
                    Error::Config(format!("sample index {i} out of range for {}", self.len()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Batch {
            body: self.body.index_select(&ids, 0)?,
            hands: self.hands.index_select(&ids, 0)?,
            face: self.face.index_select(&ids, 0)?,
            video_mask: self.video_mask.index_select(&ids, 0)?,
            text: self.text.index_select(&ids, 0)?,
            text_mask: self.text_mask.index_select(&ids, 0)?,
            translations,
        })
    }
}

/// Little-endian bytes of a tensor in its own dtype.
fn tensor_bytes(tensor: &Tensor) -> Result<(Dtype, Vec<u8>)> {
    let flat = tensor.flatten_all()?.to_device(&Device::Cpu)?;
    Ok(match tensor.dtype() {
        DType::F32 => (
            Dtype::F32,
            flat.to_vec1::<f32>()?
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
        ),
        DType::U32 => (
            Dtype::U32,
            flat.to_vec1::<u32>()?
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
        ),
        DType::U8 => (Dtype::U8, flat.to_vec1::<u8>()?),
        other => {
            return Err(Error::Bundle(format!("cannot store dtype {other:?}")));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::align::{KeypointEntry, Sample};
    use crate::data::keypoints::KeypointRecord;
    use serde_json::json;

    fn provider() -> SampleProvider {
        let texts = ["hello how are you", "thank you", "see you later"];
        let samples: Vec<Sample> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let frames: Vec<_> = (0..(i + 2))
                    .map(|f| json!({"people": [{"pose_keypoints_2d": [f as f32, 1.0, 0.9]}]}))
                    .collect();
                let record = KeypointRecord::from_json_value(json!({ "frames": frames }));
                Sample {
                    video_id: format!("v{i}"),
                    keypoint_source: KeypointEntry::inline(format!("v{i}.json"), record).source,
                    translation: t.to_string(),
                }
            })
            .collect();
        let vocab = Vocabulary::build(&texts, &SpecialTokens::default()).unwrap();
        let config = DataConfig {
            max_video_len: 8,
            max_text_len: 10,
            ..DataConfig::default()
        };
        SampleProvider::new(samples, Arc::new(vocab), config, Device::Cpu)
    }

    #[test]
    fn test_bundle_shapes() {
        let bundle = PreprocessedBundle::from_provider(&provider(), &Device::Cpu).unwrap();
        assert_eq!(bundle.len(), 3);
        assert_eq!(bundle.body.dims(), &[3, 8, 50]);
        assert_eq!(bundle.hands.dims(), &[3, 8, 84]);
        assert_eq!(bundle.face.dims(), &[3, 8, 140]);
        assert_eq!(bundle.video_mask.dims(), &[3, 8]);
        assert_eq!(bundle.text.dims(), &[3, 10]);
        assert_eq!(bundle.text.dtype(), DType::U32);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_data.safetensors");
        let bundle = PreprocessedBundle::from_provider(&provider(), &Device::Cpu).unwrap();
        bundle.save(&path).unwrap();

        let loaded = PreprocessedBundle::load(&path, &Device::Cpu).unwrap();
        assert_eq!(loaded.translations, bundle.translations);
        assert_eq!(loaded.vocab, bundle.vocab);
        let a: Vec<f32> = bundle.body.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = loaded.body.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
        let a: Vec<u32> = bundle.text.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<u32> = loaded.text.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_bundle_batches() {
        let bundle = PreprocessedBundle::from_provider(&provider(), &Device::Cpu).unwrap();
        let batch = bundle.batch(&[2, 0]).unwrap();
        assert_eq!(batch.translations, vec!["see you later", "hello how are you"]);
        assert_eq!(batch.body.dims(), &[2, 8, 50]);
        let lens: Vec<u8> = batch.video_mask.sum(1).unwrap().to_vec1().unwrap();
        assert_eq!(lens, vec![4, 2]);
        assert!(bundle.batch(&[7]).is_err());
    }

    #[test]
    fn test_load_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.safetensors");
        std::fs::write(&path, b"not a safetensors file").unwrap();
        assert!(PreprocessedBundle::load(&path, &Device::Cpu).is_err());
    }

    #[test]
    fn test_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        for (name, frames) in [("v0_openpose.json", 3), ("v1_openpose.json", 5)] {
            let frames: Vec<_> = (0..frames)
                .map(|_| json!({"people": [{"pose_keypoints_2d": [0.5, 0.5, 1.0]}]}))
                .collect();
            std::fs::write(dir.path().join(name), json!({ "frames": frames }).to_string()).unwrap();
        }
        std::fs::write(
            dir.path().join("table.csv"),
            "SENTENCE_NAME,SENTENCE\nv0,hello there\nv1,good morning there\nv9,no video here\n",
        )
        .unwrap();
        let config = DataConfig {
            max_video_len: 8,
            max_text_len: 10,
            ..DataConfig::default()
        };

        let bundle =
            PreprocessedBundle::from_directory(dir.path(), &config, &SpecialTokens::default(), &Device::Cpu)
                .unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.body.dims(), &[2, 8, 50]);
        // Unmatched rows still contribute words.
        assert!(bundle.vocab.get("video").is_some());
        let mut translations = bundle.translations.clone();
        translations.sort();
        assert_eq!(translations, vec!["good morning there", "hello there"]);
    }
}
