//! Training objective: padded cross-entropy plus weighted temporal penalty.

use candle_core::{D, DType, Tensor};

use crate::Result;

/// Mean token cross-entropy, skipping positions whose target is `pad`.
///
/// - `logits`: `[B, T, V]`
/// - `targets`: `[B, T]` u32
///
/// Returns a scalar; zero when every target is padding.
pub fn masked_cross_entropy(logits: &Tensor, targets: &Tensor, pad: u32) -> Result<Tensor> {
    let targets = targets.contiguous()?;
    let log_probs = candle_nn::ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
    let picked = log_probs
        .gather(&targets.unsqueeze(D::Minus1)?, D::Minus1)?
        .squeeze(D::Minus1)?; // [B, T]
    let weights = targets.ne(pad)?.to_dtype(DType::F32)?;
    let count = weights.sum_all()?.to_scalar::<f32>()?;
    if count == 0.0 {
        return Ok(Tensor::zeros((), DType::F32, logits.device())?);
    }
    Ok((picked.mul(&weights)?.sum_all()?.neg()? / f64::from(count))?)
}

/// `cross_entropy + weight * temporal_loss`.
pub fn combined_loss(cross_entropy: &Tensor, temporal_loss: &Tensor, weight: f64) -> Result<Tensor> {
    Ok((cross_entropy + temporal_loss.affine(weight, 0.0)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_uniform_logits() {
        let device = Device::Cpu;
        // Uniform logits over 4 classes give ln(4) per token.
        let logits = Tensor::zeros((1, 3, 4), DType::F32, &device).unwrap();
        let targets = Tensor::new(&[[1u32, 2, 3]], &device).unwrap();
        let loss: f32 = masked_cross_entropy(&logits, &targets, 0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!((loss - 4f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_pad_targets_ignored() {
        let device = Device::Cpu;
        let logits = Tensor::new(
            &[[[5f32, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]]],
            &device,
        )
        .unwrap();
        let with_pad = Tensor::new(&[[1u32, 1, 0]], &device).unwrap();
        let without = Tensor::new(&[[1u32, 1]], &device).unwrap();

        let a: f32 = masked_cross_entropy(&logits, &with_pad, 0)
            .unwrap()
            .to_scalar()
            .unwrap();
        let b: f32 = masked_cross_entropy(&logits.narrow(1, 0, 2).unwrap(), &without, 0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn test_all_padding_is_zero() {
        let device = Device::Cpu;
        let logits = Tensor::randn(0f32, 1.0, (2, 2, 5), &device).unwrap();
        let targets = Tensor::zeros((2, 2), DType::U32, &device).unwrap();
        let loss: f32 = masked_cross_entropy(&logits, &targets, 0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_combined_loss() {
        let device = Device::Cpu;
        let ce = Tensor::new(2f32, &device).unwrap();
        let tcr = Tensor::new(3f32, &device).unwrap();
        let total: f32 = combined_loss(&ce, &tcr, 0.1).unwrap().to_scalar().unwrap();
        assert!((total - 2.3).abs() < 1e-6);
    }
}
