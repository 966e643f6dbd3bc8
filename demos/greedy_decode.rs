//! Greedy Decoding From a Randomly Initialized Decoder
//!
//! Builds a decoder from command-line options (or a JSON config), feeds it a
//! synthetic encoder state and prints a JSON summary of the decoded batch.
//! Useful for eyeballing how attention strategies, stacks and constraint
//! masks change the shape of the output.
//!
//! ## Usage
//!
//! ```bash
//! # Plain free-running decode
//! cargo run --release --example greedy_decode
//!
//! # Windowed attention over a 6-word input
//! cargo run --release --example greedy_decode -- --attention windowed --radius 1
//!
//! # Bracket-constrained decoding with the parent stack
//! cargo run --release --example greedy_decode -- --stack parent --constrained
//!
//! # Load everything from a config file
//! cargo run --release --example greedy_decode -- --config decoder.json
//! ```

use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use stackdec::{
    AttentionConfig, AttentionScoring, AttentionStrategyKind, DecodeInputs, Decoder, DecoderConfig,
    GrammarComposition, HiddenState, RnnKind, StackConfig, SymbolClasses, Tensor,
};
use std::fs;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AttentionArg {
    Plain,
    Windowed,
    BothSide,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StackArg {
    None,
    Parent,
    Grammar,
}

#[derive(Parser)]
#[command(
    name = "greedy_decode",
    about = "Greedy decoding from a randomly initialized stack decoder"
)]
struct Args {
    /// JSON decoder config; overrides the architecture flags below
    #[arg(long)]
    config: Option<String>,

    /// Vocabulary size
    #[arg(long, default_value_t = 24)]
    vocab: usize,

    /// Maximum number of decoding steps
    #[arg(long, default_value_t = 12)]
    max_len: usize,

    /// Number of examples in the batch
    #[arg(long, default_value_t = 3)]
    batch: usize,

    /// Number of synthetic input words per example
    #[arg(long, default_value_t = 6)]
    source_len: usize,

    /// Attention strategy
    #[arg(long, value_enum)]
    attention: Option<AttentionArg>,

    /// Window radius for windowed attention
    #[arg(long, default_value_t = 1)]
    radius: usize,

    /// Use additive instead of dot-product scoring
    #[arg(long)]
    additive: bool,

    /// Auxiliary stack
    #[arg(long, value_enum, default_value = "none")]
    stack: StackArg,

    /// Mask ill-formed continuations (implies the parent stack)
    #[arg(long)]
    constrained: bool,

    /// Use an LSTM instead of a GRU
    #[arg(long)]
    lstm: bool,

    /// Seed for parameters and synthetic inputs
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// 0 = sos, 1 = eos, 2..=5 open, 6 close, 7 shift
fn bracket_classes() -> SymbolClasses {
    SymbolClasses {
        open: vec![2, 3, 4, 5],
        close: vec![6],
        shift: vec![7],
    }
}

fn build_config(args: &Args) -> Result<DecoderConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config {
        return Ok(DecoderConfig::from_json(&fs::read_to_string(path)?)?);
    }

    let mut config = DecoderConfig::tiny(args.vocab, 0, 1);
    config.max_len = args.max_len;
    if args.lstm {
        config.rnn_cell = RnnKind::Lstm;
    }

    if let Some(attention) = args.attention {
        let strategy = match attention {
            AttentionArg::Plain => AttentionStrategyKind::Plain,
            AttentionArg::Windowed => AttentionStrategyKind::Windowed { radius: args.radius },
            AttentionArg::BothSide => AttentionStrategyKind::BothSide,
        };
        let scoring = if args.additive {
            AttentionScoring::Additive
        } else {
            AttentionScoring::Dot
        };
        config = config.with_attention(AttentionConfig { strategy, scoring });
    }

    let stack = match (args.stack, args.constrained) {
        (StackArg::Grammar, _) => StackConfig::Grammar {
            composition: GrammarComposition::Recurrent,
            track_length: true,
        },
        (StackArg::Parent, _) | (_, true) => StackConfig::Parent {
            parent_feature: true,
            track_length: true,
        },
        (StackArg::None, false) => StackConfig::None,
    };
    config = config.with_stack(stack);

    if args.constrained {
        config = config.with_constraints(bracket_classes());
    }

    Ok(config)
}

fn random_tensor(shape: Vec<usize>, rng: &mut StdRng) -> Tensor {
    let normal = Normal::new(0.0, 0.5).expect("valid normal distribution");
    let size = shape.iter().product();
    Tensor::new((0..size).map(|_| normal.sample(rng)).collect(), shape)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = build_config(&args)?;

    println!("=== Stack Decoder ===");
    println!("vocab: {}, hidden: {}, max_len: {}", config.vocab_size, config.hidden_size, config.max_len);
    println!("rnn: {:?} x {}", config.rnn_cell, config.n_layers);
    println!("attention: {:?}", config.attention);
    println!("stack: {:?}, constrained: {}", config.stack, config.constrained);

    let decoder = Decoder::new(config.clone(), args.seed)?;
    println!("feature width: {}\n", decoder.feature_width());

    let mut rng = StdRng::seed_from_u64(args.seed);
    // A bidirectional encoder hands over [2 * layers, batch, hidden / 2]
    let state_shape = if config.bidirectional_encoder {
        vec![2 * config.n_layers, args.batch, config.encoder_hidden_size()]
    } else {
        vec![config.n_layers, args.batch, config.hidden_size]
    };
    let h = random_tensor(state_shape.clone(), &mut rng);
    let hidden = match config.rnn_cell {
        RnnKind::Gru => HiddenState::new(h),
        RnnKind::Lstm => {
            let c = random_tensor(state_shape, &mut rng);
            HiddenState::with_cell(h, c)
        }
    };
    let encoder_outputs = random_tensor(vec![args.batch, args.source_len, config.hidden_size], &mut rng);
    let input_lengths = vec![args.source_len; args.batch];

    let mut inputs = DecodeInputs::new()
        .encoder_hidden(&hidden)
        .input_lengths(&input_lengths);
    if config.use_attention() {
        inputs = inputs.encoder_outputs(&encoder_outputs);
    }

    let out = decoder.decode(&inputs, &mut rng)?;
    println!("{}", serde_json::to_string_pretty(&out.summary())?);

    Ok(())
}
