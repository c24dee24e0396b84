//! ALT CLI - Pack, Inspect and Validate ALT Model Files
//!
//! ## Commands
//!
//! - `alt pack <dir>` - Build an ALT file from config, vocabulary and weights
//! - `alt inspect <file>` - Show a section-by-section summary
//! - `alt validate <file>` - Fully decode a file and report the first error

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alt_format::DataType;

mod commands;

use commands::{inspect, pack, validate};

/// ALT - model container tooling
#[derive(Parser)]
#[command(name = "alt")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Tensor storage selected on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum DtypeArg {
    /// 32-bit float
    F32,
    /// 16-bit float
    F16,
    /// 8-bit affine quantization
    Q8,
    /// 4-bit affine quantization, packed
    Q4,
}

impl From<DtypeArg> for DataType {
    fn from(arg: DtypeArg) -> Self {
        match arg {
            DtypeArg::F32 => DataType::Float32,
            DtypeArg::F16 => DataType::Float16,
            DtypeArg::Q8 => DataType::QInt8,
            DtypeArg::Q4 => DataType::QInt4,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build an ALT file
    ///
    /// Inputs default to `config.json`, `vocab.json` and `model.safetensors`
    /// inside the model directory; each can be overridden.
    ///
    /// Examples:
    ///   alt pack ./mistral-7b -o mistral-7b-q8.alt --dtype q8
    ///   alt pack --config config.json --vocab vocab.json --tokenizer-only -o vocab.alt
    Pack {
        /// Model directory
        dir: Option<PathBuf>,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// HuggingFace-style config.json
        #[arg(long)]
        config: Option<PathBuf>,

        /// Vocabulary JSON
        #[arg(long)]
        vocab: Option<PathBuf>,

        /// Weights in safetensors format
        #[arg(long)]
        weights: Option<PathBuf>,

        /// Tensor storage type
        #[arg(long, value_enum, default_value = "f32")]
        dtype: DtypeArg,

        /// Maximum context length recorded with the tensors
        #[arg(long, default_value = "8192")]
        context_len: i32,

        /// Model type (defaults to `model_type` from the config)
        #[arg(long)]
        model_type: Option<String>,

        /// Upstream model identifier
        #[arg(long, default_value = "")]
        base_model: String,

        /// Author or organisation
        #[arg(long, default_value = "")]
        author: String,

        /// License identifier
        #[arg(long, default_value = "")]
        license: String,

        /// Write no Tensors section
        #[arg(long)]
        tokenizer_only: bool,
    },

    /// Show a section-by-section summary
    #[command(alias = "info")]
    Inspect {
        /// ALT file
        file: PathBuf,

        /// List every tensor
        #[arg(short, long)]
        tensors: bool,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Decode a file completely and report the first error
    Validate {
        /// ALT file
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = match cli.command {
        Commands::Pack {
            dir,
            output,
            config,
            vocab,
            weights,
            dtype,
            context_len,
            model_type,
            base_model,
            author,
            license,
            tokenizer_only,
        } => {
            let sources = pack::PackSources::resolve(dir, config, vocab, weights, tokenizer_only);
            let options = pack::PackOptions {
                output,
                data_type: dtype.into(),
                context_len,
                model_type,
                base_model,
                author,
                license,
            };
            pack::run(&sources, &options)
        }

        Commands::Inspect {
            file,
            tensors,
            json,
        } => inspect::run(&file, tensors, json),

        Commands::Validate { file } => validate::run(&file),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
