use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use stackdec::layers::{Embedding, Linear};
use stackdec::{
    AttentionConfig, AttentionScoring, AttentionStrategyKind, ConstraintMask, DecodeInputs, Decoder,
    DecoderConfig, DecoderError, GrammarComposition, HiddenState, MaskState, RnnKind, StackConfig,
    SymbolClasses, Tensor,
};

const SOS: usize = 0;
const EOS: usize = 1;

fn rng() -> StdRng {
    StdRng::seed_from_u64(1234)
}

fn encoder_hidden(layers: usize, batch: usize, hidden: usize) -> HiddenState {
    HiddenState::new(Tensor::new(
        (0..layers * batch * hidden).map(|i| ((i % 13) as f32 - 6.0) / 10.0).collect(),
        vec![layers, batch, hidden],
    ))
}

fn encoder_outputs(batch: usize, source_len: usize, hidden: usize) -> Tensor {
    Tensor::new(
        (0..batch * source_len * hidden)
            .map(|i| ((i * 5 % 17) as f32 - 8.0) / 10.0)
            .collect(),
        vec![batch, source_len, hidden],
    )
}

#[test]
fn test_free_running_produces_max_len_steps() {
    let mut config = DecoderConfig::tiny(12, SOS, EOS);
    config.max_len = 7;
    let decoder = Decoder::new(config, 3).unwrap();
    let hidden = encoder_hidden(1, 3, 16);

    let out = decoder
        .decode(&DecodeInputs::new().encoder_hidden(&hidden), &mut rng())
        .unwrap();

    assert!(!out.teacher_forced);
    assert_eq!(out.steps(), 7);
    assert_eq!(out.symbols.len(), 7);
    assert!(out.symbols.iter().all(|step| step.len() == 3));
    assert_eq!(out.lengths.len(), 3);
    assert!(out.lengths.iter().all(|&l| l <= 7));
    assert!(out.attention.is_none());
    for output in &out.outputs {
        assert_eq!(output.shape, vec![3, 12]);
    }
}

#[test]
fn test_teacher_forced_produces_t_minus_one_steps() {
    let decoder = Decoder::new(DecoderConfig::tiny(12, SOS, EOS), 3).unwrap();
    let targets = vec![vec![SOS, 4, 5, 6, EOS], vec![SOS, 7, 8, EOS, EOS]];

    let out = decoder
        .decode(&DecodeInputs::new().targets(&targets).teacher_forcing(1.0), &mut rng())
        .unwrap();

    assert!(out.teacher_forced);
    assert_eq!(out.steps(), 4);
    assert!(out.lengths.iter().all(|&l| l <= 4));
}

#[test]
fn test_targets_without_teacher_forcing_run_free() {
    let mut config = DecoderConfig::tiny(12, SOS, EOS);
    config.max_len = 9;
    let decoder = Decoder::new(config, 3).unwrap();
    let targets = vec![vec![SOS, 4, 5]];

    let out = decoder
        .decode(&DecodeInputs::new().targets(&targets), &mut rng())
        .unwrap();
    assert!(!out.teacher_forced);
    assert_eq!(out.steps(), 9);
}

/// Decoder whose prediction depends only on the current input symbol
///
/// One-hot input embeddings and a projection that routes input symbol `s`
/// to score `next[s]`, ignoring the recurrent output.
fn lookup_decoder(next: &[usize]) -> Decoder {
    let vocab = next.len();
    let hidden = 2;
    let mut config = DecoderConfig::tiny(vocab, SOS, EOS);
    config.input_size = vocab;
    config.hidden_size = hidden;

    let mut identity = Tensor::zeros(vec![vocab, vocab]);
    let mut weight = Tensor::zeros(vec![vocab + hidden, vocab]);
    for (s, &n) in next.iter().enumerate() {
        identity.data[s * vocab + s] = 1.0;
        weight.data[s * vocab + n] = 10.0;
    }

    Decoder::builder(config)
        .seed(5)
        .embedding(Embedding::from_weight(identity).unwrap())
        .projection(Linear::from_parts(weight, Tensor::zeros(vec![vocab])).unwrap())
        .build()
        .unwrap()
}

#[test]
fn test_first_end_marker_fixes_the_length() {
    // symbol 3 predicts the end marker, everything else predicts 4
    let decoder = lookup_decoder(&[4, 4, 4, EOS, 4, 4]);
    let targets = vec![vec![SOS, 2, 3, 2, 3, 2], vec![SOS, 2, 2, 2, 2, 2]];

    let out = decoder
        .decode(&DecodeInputs::new().targets(&targets).teacher_forcing(1.0), &mut rng())
        .unwrap();

    assert_eq!(
        out.symbols.iter().map(|s| s[0]).collect::<Vec<_>>(),
        vec![4, 4, EOS, 4, EOS]
    );
    assert_eq!(out.lengths, vec![3, 5]);
    assert_eq!(out.sequences()[0], vec![4, 4, EOS]);
}

#[test]
fn test_free_running_feeds_back_predictions() {
    // 0 → 2 → 3 → 4 → 1 (end) → 4 ...
    let decoder = lookup_decoder(&[2, 4, 3, 4, EOS, 4]);
    let hidden = encoder_hidden(1, 2, 2);

    let out = decoder
        .decode(&DecodeInputs::new().encoder_hidden(&hidden), &mut rng())
        .unwrap();

    assert_eq!(out.sequences(), vec![vec![2, 3, 4, EOS]; 2]);
    assert_eq!(out.lengths, vec![4, 4]);
    assert_eq!(out.steps(), 20);
}

#[derive(Debug)]
struct OnlySeven;

impl ConstraintMask for OnlySeven {
    fn fill(&self, _state: &MaskState, row: &mut [f32]) {
        row[7] = 1.0;
    }
}

#[test]
fn test_constrained_decoding_follows_the_mask() {
    let config = DecoderConfig::tiny(10, SOS, EOS)
        .with_stack(StackConfig::Parent {
            parent_feature: true,
            track_length: false,
        })
        .with_constraints(SymbolClasses::default());
    let decoder = Decoder::builder(config).seed(9).constraint(Arc::new(OnlySeven)).build().unwrap();
    let hidden = encoder_hidden(1, 4, 16);

    let out = decoder
        .decode(&DecodeInputs::new().encoder_hidden(&hidden), &mut rng())
        .unwrap();

    assert!(out.symbols.iter().flatten().all(|&s| s == 7));
    // the recorded outputs are the unmasked log-probabilities
    for output in &out.outputs {
        for b in 0..4 {
            let total: f32 = output.row(b).iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
    }
}

#[test]
fn test_bracket_constraint_keeps_trees_well_formed() {
    // 0 sos, 1 eos, 2..4 open, 5 close, 6 shift, 7 unclassified
    let classes = SymbolClasses {
        open: vec![2, 3, 4],
        close: vec![5],
        shift: vec![6],
    };
    let mut config = DecoderConfig::tiny(8, SOS, EOS)
        .with_stack(StackConfig::Parent {
            parent_feature: true,
            track_length: true,
        })
        .with_constraints(classes);
    config.max_len = 30;
    let lengths = [3, 2, 4];
    let hidden = encoder_hidden(1, 3, 16);

    for seed in 0..5 {
        let decoder = Decoder::new(config.clone(), seed).unwrap();
        let out = decoder
            .decode(
                &DecodeInputs::new().encoder_hidden(&hidden).input_lengths(&lengths),
                &mut rng(),
            )
            .unwrap();

        for (b, sequence) in out.sequences().iter().enumerate() {
            assert!((2..=4).contains(&sequence[0]), "tree must start with an open symbol");
            let mut depth: i32 = 0;
            let mut shifts = 0;
            for (i, &symbol) in sequence.iter().enumerate() {
                assert_ne!(symbol, 7);
                match symbol {
                    2..=4 => depth += 1,
                    5 => depth -= 1,
                    6 => shifts += 1,
                    EOS => assert_eq!(i, sequence.len() - 1),
                    _ => {}
                }
                assert!(depth >= 0);
                if depth == 0 && i + 1 < sequence.len() {
                    assert_eq!(sequence[i + 1], EOS);
                }
            }
            assert!(shifts <= lengths[b]);
        }
    }
}

fn attention_config(strategy: AttentionStrategyKind, scoring: AttentionScoring) -> DecoderConfig {
    let mut config = DecoderConfig::tiny(12, SOS, EOS).with_attention(AttentionConfig { strategy, scoring });
    config.max_len = 6;
    config
}

#[test]
fn test_attention_weights_are_distributions() {
    let outputs = encoder_outputs(2, 5, 16);
    let hidden = encoder_hidden(1, 2, 16);
    let lengths = [5, 3];

    for strategy in [
        AttentionStrategyKind::Plain,
        AttentionStrategyKind::Windowed { radius: 1 },
        AttentionStrategyKind::BothSide,
    ] {
        for scoring in [AttentionScoring::Dot, AttentionScoring::Additive] {
            let decoder = Decoder::new(attention_config(strategy, scoring), 21).unwrap();
            let out = decoder
                .decode(
                    &DecodeInputs::new()
                        .encoder_hidden(&hidden)
                        .encoder_outputs(&outputs)
                        .input_lengths(&lengths),
                    &mut rng(),
                )
                .unwrap();

            let weights = out.attention.as_ref().expect("attention weights are collected");
            assert_eq!(weights.len(), out.steps());
            for step in weights {
                assert_eq!(step.shape, vec![2, 5]);
                for total in step.sum_last() {
                    assert!((total - 1.0).abs() < 1e-4, "{strategy:?}/{scoring:?}: {total}");
                }
            }
        }
    }
}

#[test]
fn test_windowed_attention_follows_the_input_pointer() {
    let decoder = Decoder::new(
        attention_config(AttentionStrategyKind::Windowed { radius: 0 }, AttentionScoring::Dot),
        2,
    )
    .unwrap();
    let outputs = encoder_outputs(1, 4, 16);
    let hidden = encoder_hidden(1, 1, 16);

    let out = decoder
        .decode(
            &DecodeInputs::new().encoder_hidden(&hidden).encoder_outputs(&outputs),
            &mut rng(),
        )
        .unwrap();

    // No shift classes: every fed symbol except the start symbol advances
    // the pointer by one
    let weights = out.attention.unwrap();
    for (step, w) in weights.iter().enumerate() {
        let consumed = out.symbols[..step].iter().filter(|s| s[0] != SOS).count();
        let expected = consumed.min(3);
        assert!((w.row(0)[expected] - 1.0).abs() < 1e-6, "step {step}");
    }
}

#[test]
fn test_grammar_stack_decoding() {
    for composition in [GrammarComposition::Additive, GrammarComposition::Recurrent] {
        let config = DecoderConfig::tiny(12, SOS, EOS).with_stack(StackConfig::Grammar {
            composition,
            track_length: true,
        });
        let decoder = Decoder::new(config, 8).unwrap();
        let targets = vec![vec![SOS, 3, 4, 5, EOS]; 2];
        let out = decoder
            .decode(&DecodeInputs::new().targets(&targets).teacher_forcing(1.0), &mut rng())
            .unwrap();
        assert_eq!(out.steps(), 4);
    }
}

#[test]
fn test_bidirectional_encoder_state_is_merged() {
    let mut config = DecoderConfig::tiny(12, SOS, EOS);
    config.bidirectional_encoder = true;
    config.n_layers = 2;
    config.max_len = 3;
    let decoder = Decoder::new(config, 4).unwrap();

    // [2 directions × 2 layers, batch 3, encoder hidden 8]
    let hidden = encoder_hidden(4, 3, 8);
    let out = decoder
        .decode(&DecodeInputs::new().encoder_hidden(&hidden), &mut rng())
        .unwrap();
    assert_eq!(out.hidden.h.shape, vec![2, 3, 16]);
}

#[test]
fn test_lstm_decoder_uses_cell_state() {
    let mut config = DecoderConfig::tiny(12, SOS, EOS);
    config.rnn_cell = RnnKind::Lstm;
    config.max_len = 4;
    let decoder = Decoder::new(config, 4).unwrap();

    let h = encoder_hidden(1, 2, 16);
    let hidden = HiddenState::with_cell(h.h.clone(), h.h);
    let out = decoder
        .decode(&DecodeInputs::new().encoder_hidden(&hidden), &mut rng())
        .unwrap();
    assert_eq!(out.steps(), 4);
    assert!(out.hidden.c.is_some());
}

#[test]
fn test_same_seed_same_decode() {
    let mut config = DecoderConfig::tiny(12, SOS, EOS);
    config.input_dropout = 0.3;
    config.dropout = 0.3;
    config.n_layers = 2;
    let hidden = encoder_hidden(2, 2, 16);

    let run = || {
        let mut decoder = Decoder::new(config.clone(), 17).unwrap();
        decoder.train();
        decoder
            .decode(&DecodeInputs::new().encoder_hidden(&hidden), &mut rng())
            .unwrap()
            .summary()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_missing_encoder_outputs_with_attention() {
    let decoder = Decoder::new(
        attention_config(AttentionStrategyKind::Plain, AttentionScoring::Dot),
        0,
    )
    .unwrap();
    let hidden = encoder_hidden(1, 1, 16);
    let err = decoder
        .decode(&DecodeInputs::new().encoder_hidden(&hidden), &mut rng())
        .unwrap_err();
    assert!(matches!(err, DecoderError::Configuration(_)));
}

#[test]
fn test_empty_source_is_rejected_for_every_strategy() {
    let outputs = Tensor::zeros(vec![2, 0, 16]);
    let hidden = encoder_hidden(1, 2, 16);

    for strategy in [
        AttentionStrategyKind::Plain,
        AttentionStrategyKind::Windowed { radius: 1 },
        AttentionStrategyKind::BothSide,
    ] {
        let mut config = attention_config(strategy, AttentionScoring::Dot);
        config.max_len = 3;
        let decoder = Decoder::new(config, 0).unwrap();
        let err = decoder
            .decode(
                &DecodeInputs::new().encoder_hidden(&hidden).encoder_outputs(&outputs),
                &mut rng(),
            )
            .unwrap_err();
        assert!(matches!(err, DecoderError::Configuration(_)), "{strategy:?}: {err:?}");
    }
}

#[test]
fn test_batch_size_cannot_be_inferred() {
    let decoder = Decoder::new(DecoderConfig::tiny(12, SOS, EOS), 0).unwrap();
    let err = decoder.decode(&DecodeInputs::new(), &mut rng()).unwrap_err();
    assert!(matches!(err, DecoderError::Configuration(_)));
}

#[test]
fn test_teacher_forcing_without_targets() {
    let decoder = Decoder::new(DecoderConfig::tiny(12, SOS, EOS), 0).unwrap();
    let hidden = encoder_hidden(1, 1, 16);
    let err = decoder
        .decode(
            &DecodeInputs::new().encoder_hidden(&hidden).teacher_forcing(0.5),
            &mut rng(),
        )
        .unwrap_err();
    assert!(matches!(err, DecoderError::Configuration(_)));
}

#[test]
fn test_hidden_state_shape_mismatch_is_reported() {
    let decoder = Decoder::new(DecoderConfig::tiny(12, SOS, EOS), 0).unwrap();
    let hidden = encoder_hidden(2, 1, 16);
    let err = decoder
        .decode(&DecodeInputs::new().encoder_hidden(&hidden), &mut rng())
        .unwrap_err();
    assert!(matches!(err, DecoderError::ShapeMismatch { .. }));
}
