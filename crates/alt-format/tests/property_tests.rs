//! Property-based tests using proptest
//!
//! Size accounting, alignment and quantization bounds over generated
//! records.

use std::io::Cursor;

use alt_format::quantization::{decode_payload, encode_payload, pack_nibbles, unpack_nibbles};
use alt_format::{
    padding_for, AltReader, AltWriter, Container, DataType, GeneralRecord, ParametersRecord,
    QuantizedScalar, SectionCodec, TokenizerRecord, VocabEntry, Vocabulary,
};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[a-zA-Z0-9 _./-]{1,24}", "\\PC{0,8}"]
}

fn general_strategy() -> impl Strategy<Value = GeneralRecord> {
    prop::collection::vec(text_strategy(), 7).prop_map(|f| GeneralRecord {
        model_type: f[0].clone(),
        base_model: f[1].clone(),
        author: f[2].clone(),
        created_at: f[3].clone(),
        last_modified: f[4].clone(),
        license: f[5].clone(),
        uuid: f[6].clone(),
    })
}

fn vocab_strategy() -> impl Strategy<Value = Vocabulary> {
    prop::collection::vec(
        (text_strategy(), -100.0f32..100.0, any::<[bool; 4]>()),
        0..40,
    )
    .prop_map(|entries| {
        Vocabulary::new(
            entries
                .into_iter()
                .map(|(text, score, flags)| VocabEntry {
                    text,
                    score,
                    byte: flags[0],
                    control: flags[1],
                    unknown: flags[2],
                    unused: flags[3],
                })
                .collect(),
        )
    })
}

fn parameters_strategy() -> impl Strategy<Value = ParametersRecord> {
    (1i32..64, 1i32..8192, "[a-z_]{0,12}", any::<bool>()).prop_map(
        |(heads, hidden, act, tie)| ParametersRecord {
            hidden_act: act,
            tie_word_embeddings: tie,
            hidden_size: hidden,
            num_attention_heads: heads,
            num_key_value_heads: heads,
            ..Default::default()
        },
    )
}

fn encoded_len<S: SectionCodec>(section: &S) -> (u64, Vec<u8>) {
    let mut w = AltWriter::new(Vec::new());
    let total = section.write(&mut w).unwrap();
    (total, w.into_inner())
}

// ============================================================================
// Section properties
// ============================================================================

proptest! {
    // Property: declared size equals emitted body bytes for any string mix
    #[test]
    fn test_general_size_accurate(general in general_strategy()) {
        let (total, bytes) = encoded_len(&general);
        let body = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        prop_assert_eq!(body, general.size());
        prop_assert_eq!(total, bytes.len() as u64);
        prop_assert_eq!(total % 32, 0);

        let decoded = GeneralRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap();
        prop_assert_eq!(decoded, general);
    }

    // Property: tokenizer round trip keeps order, scores and types
    #[test]
    fn test_tokenizer_round_trip(vocab in vocab_strategy()) {
        let record = TokenizerRecord::from_source(&vocab).unwrap();
        let (_, bytes) = encoded_len(&record);
        let decoded = TokenizerRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap();
        prop_assert_eq!(decoded.vocab_size(), vocab.tokens.len());
        prop_assert_eq!(decoded, record);
    }

    // Property: head size is re-derived on read
    #[test]
    fn test_parameters_round_trip(params in parameters_strategy()) {
        let (_, bytes) = encoded_len(&params);
        let decoded = ParametersRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap();
        prop_assert_eq!(
            decoded.head_size().unwrap(),
            params.hidden_size / params.num_attention_heads
        );
        prop_assert_eq!(decoded, params);
    }

    // Property: a whole container is 8 bytes past a 32-byte boundary
    #[test]
    fn test_container_length(general in general_strategy(), vocab in vocab_strategy()) {
        let container = Container::new(
            general,
            ParametersRecord::default(),
            TokenizerRecord::from_source(&vocab).unwrap(),
        );
        let bytes = container.to_bytes().unwrap();
        prop_assert_eq!(bytes.len() % 32, 8);
        prop_assert_eq!(Container::from_bytes(&bytes).unwrap(), container);
    }
}

// ============================================================================
// Alignment and quantization properties
// ============================================================================

proptest! {
    #[test]
    fn test_padding_reaches_boundary(offset in 0u64..1_000_000, shift in 0u32..8) {
        let alignment = 1u64 << shift;
        let pad = padding_for(offset, alignment);
        prop_assert!(pad < alignment);
        prop_assert_eq!((offset + pad) % alignment, 0);
    }

    #[test]
    fn test_q8_error_bounded(values in prop::collection::vec(-1000.0f32..1000.0, 1..256)) {
        let (params, payload) = encode_payload(&values, DataType::QInt8).unwrap();
        let params = params.unwrap();
        let decoded = decode_payload(&payload, values.len(), DataType::QInt8, Some(&params)).unwrap();
        let tolerance = params.delta / 2.0 + params.max.abs().max(params.min.abs()) * 1e-6;
        for (x, y) in values.iter().zip(&decoded) {
            prop_assert!((x - y).abs() <= tolerance, "{} vs {} (delta {})", x, y, params.delta);
        }
    }

    #[test]
    fn test_q4_error_bounded(values in prop::collection::vec(-10.0f32..10.0, 1..128)) {
        let (params, payload) = encode_payload(&values, DataType::QInt4).unwrap();
        let params = params.unwrap();
        prop_assert_eq!(payload.len(), values.len().div_ceil(2));
        let decoded = decode_payload(&payload, values.len(), DataType::QInt4, Some(&params)).unwrap();
        let tolerance = params.delta / 2.0 + 1e-5;
        for (x, y) in values.iter().zip(&decoded) {
            prop_assert!((x - y).abs() <= tolerance);
        }
    }

    #[test]
    fn test_nibble_pack_inverse(codes in prop::collection::vec(0u8..16, 0..64)) {
        let packed = pack_nibbles(&codes);
        prop_assert_eq!(packed.len(), codes.len().div_ceil(2));
        prop_assert_eq!(unpack_nibbles(&packed, codes.len()), codes);
    }

    #[test]
    fn test_quantized_scalar_exact(value in -1.0e6f32..1.0e6) {
        let q = QuantizedScalar::quantize(value);
        prop_assert_eq!(q.dequantize(), value);
    }

    #[test]
    fn test_quantized_scalar_exact_any_finite(
        value in any::<f32>().prop_filter("finite", |v| v.is_finite())
    ) {
        let q = QuantizedScalar::quantize(value);
        prop_assert!(q.scalar.is_finite() && q.alpha.is_finite() && q.residual.is_finite());
        prop_assert_eq!(q.dequantize(), value);
    }
}
