//! Sentence → fixed-length index sequence.

use candle_core::{Device, Tensor};

use super::sequence::{mask_tensor, pad_or_truncate_slice};
use super::vocab::{Vocabulary, words};
use crate::Result;

/// Tokenized sentence of exactly `len` indices plus its validity mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedText {
    pub ids: Vec<u32>,
    pub mask: Vec<bool>,
}

/// Lowercase, split on whitespace, wrap in `<sos> … <eos>`, map unknown words
/// to `<unk>`, then truncate or pad with `<pad>` to `len`.
///
/// Truncation can cut off `<eos>`; the mask is then all-true.
pub fn tokenize(text: &str, vocab: &Vocabulary, len: usize) -> TokenizedText {
    let special = vocab.special();
    let mut ids = Vec::with_capacity(len.max(2));
    ids.push(special.sos);
    ids.extend(words(text).map(|w| vocab.index_of(&w)));
    ids.push(special.eos);

    let (ids, mask) = pad_or_truncate_slice(&ids, len, special.pad);
    TokenizedText { ids, mask }
}

/// [`tokenize`] as tensors: ids `[len]` `u32`, mask `[len]` `u8`.
pub fn encode_tensor(
    text: &str,
    vocab: &Vocabulary,
    len: usize,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let tokenized = tokenize(text, vocab, len);
    let ids = Tensor::from_vec(tokenized.ids, len, device)?;
    let mask = mask_tensor(&tokenized.mask, device)?;
    Ok((ids, mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecialTokens;

    fn vocab() -> Vocabulary {
        Vocabulary::build(&["hello how are you", "nice to meet you"], &SpecialTokens::default())
            .unwrap()
    }

    #[test]
    fn test_wrap_and_pad() {
        let vocab = vocab();
        let out = tokenize("Hello you", &vocab, 6);
        assert_eq!(
            out.ids,
            vec![1, vocab.index_of("hello"), vocab.index_of("you"), 2, 0, 0]
        );
        assert_eq!(out.mask, vec![true, true, true, true, false, false]);
    }

    #[test]
    fn test_unknown_words() {
        let vocab = vocab();
        let out = tokenize("hello stranger", &vocab, 5);
        assert_eq!(out.ids[2], 3);
    }

    #[test]
    fn test_truncation_drops_eos() {
        let vocab = vocab();
        let out = tokenize("hello how are you", &vocab, 3);
        assert_eq!(out.ids, vec![1, vocab.index_of("hello"), vocab.index_of("how")]);
        assert_eq!(out.mask, vec![true; 3]);
    }

    #[test]
    fn test_empty_text() {
        let out = tokenize("", &vocab(), 4);
        assert_eq!(out.ids, vec![1, 2, 0, 0]);
        assert_eq!(out.mask, vec![true, true, false, false]);
    }

    #[test]
    fn test_round_trip() {
        let vocab = vocab();
        for text in ["Nice to MEET you", "how are you", "you"] {
            let out = tokenize(text, &vocab, 50);
            let expected: Vec<String> = words(text).collect();
            assert_eq!(vocab.decode(&out.ids), expected.join(" "));
        }
    }

    #[test]
    fn test_tensor_form() {
        let (ids, mask) = encode_tensor("hello", &vocab(), 50, &Device::Cpu).unwrap();
        assert_eq!(ids.dims(), &[50]);
        assert_eq!(mask.dims(), &[50]);
        let mask: Vec<u8> = mask.to_vec1().unwrap();
        assert_eq!(mask.iter().filter(|&&m| m == 1).count(), 3);
    }
}
