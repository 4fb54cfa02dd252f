//! Additive attention masks.
//!
//! Masks are added to attention scores before the softmax: 0.0 for visible
//! positions and the dtype's most negative finite value for hidden ones. A
//! finite value keeps a fully padded row uniform instead of NaN.

use candle_core::{DType, Device, Result, Tensor};

/// Most negative finite value representable in `dtype`.
pub fn min_value(dtype: DType) -> f64 {
    match dtype {
        DType::F64 => f64::MIN,
        DType::F16 => -65504.0,
        DType::BF16 => -3.389_531_389_251_535_5e38,
        _ => f64::from(f32::MIN),
    }
}

/// Causal mask `[1, 1, seq_len, seq_len]`: position `i` sees positions `<= i`.
pub fn causal_mask(seq_len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let min_val = min_value(dtype);
    let mask_data: Vec<f64> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { min_val } else { 0.0 }))
        .collect();
    Tensor::new(mask_data.as_slice(), device)?
        .reshape((1, 1, seq_len, seq_len))?
        .to_dtype(dtype)
}

/// Key padding bias `[B, 1, 1, S]` from a `[B, S]` validity mask (nonzero = valid).
pub fn key_padding_bias(mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let (batch, seq_len) = mask.dims2()?;
    let min_val = min_value(dtype);
    mask.ne(0u8)?
        .to_dtype(dtype)?
        .affine(-min_val, min_val)?
        .reshape((batch, 1, 1, seq_len))
}
