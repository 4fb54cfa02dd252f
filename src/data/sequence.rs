//! Fixed-length padding and truncation with validity masks.
//!
//! Every stage exchanges a `[L, D]` tensor together with a `[L]` mask whose
//! valid positions always form a prefix: padding is trailing, truncation keeps
//! the head.

use candle_core::{DType, Tensor};

use crate::Result;

/// Mask with `min(valid, len)` leading `true` values and `false` after.
pub fn prefix_mask(valid: usize, len: usize) -> Vec<bool> {
    let valid = valid.min(len);
    let mut mask = vec![true; valid];
    mask.resize(len, false);
    mask
}

/// Pad with `pad` or truncate `values` to exactly `len` entries, returning the mask.
pub fn pad_or_truncate_slice<T: Clone>(values: &[T], len: usize, pad: T) -> (Vec<T>, Vec<bool>) {
    let mask = prefix_mask(values.len(), len);
    let mut out: Vec<T> = values.iter().take(len).cloned().collect();
    out.resize(len, pad);
    (out, mask)
}

/// Pad `[S, D]` with zero rows or keep its first `len` rows.
///
/// Returns the `[len, D]` tensor and a `[len]` `u8` mask (1 = real frame).
pub fn pad_or_truncate(tensor: &Tensor, len: usize) -> Result<(Tensor, Tensor)> {
    let (seq_len, dim) = tensor.dims2()?;
    let device = tensor.device();

    let out = if seq_len >= len {
        tensor.narrow(0, 0, len)?
    } else if seq_len == 0 {
        Tensor::zeros((len, dim), tensor.dtype(), device)?
    } else {
        let padding = Tensor::zeros((len - seq_len, dim), tensor.dtype(), device)?;
        Tensor::cat(&[tensor, &padding], 0)?
    };

    let mask = mask_tensor(&prefix_mask(seq_len, len), device)?;
    Ok((out, mask))
}

/// Boolean mask as a `u8` tensor.
pub fn mask_tensor(mask: &[bool], device: &candle_core::Device) -> Result<Tensor> {
    let data: Vec<u8> = mask.iter().map(|&m| u8::from(m)).collect();
    Ok(Tensor::from_vec(data, mask.len(), device)?)
}

/// Number of leading valid positions in a `u8` mask tensor `[L]`.
pub fn valid_length(mask: &Tensor) -> Result<usize> {
    let values: Vec<u8> = mask.to_dtype(DType::U8)?.to_vec1()?;
    Ok(values.iter().take_while(|&&m| m != 0).count())
}
