//! Pack command implementation
//!
//! Builds an ALT file from a HuggingFace-style `config.json`, a JSON
//! vocabulary and, unless `--tokenizer-only` is given, safetensors weights.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use bytesize::ByteSize;
use colored::Colorize;
use half::{bf16, f16};
use indicatif::{ProgressBar, ProgressStyle};
use safetensors::{Dtype, SafeTensors};
use tracing::{debug, info};

use alt_format::{
    Container, DataType, GeneralRecord, ModelConfig, ParametersRecord, TensorInput, TensorRecord,
    TensorsRecord, TokenType, TokenizerRecord, Vocabulary,
};

/// Input files for a pack run.
#[derive(Debug, Clone)]
pub struct PackSources {
    /// config.json, absent means all defaults
    pub config: Option<PathBuf>,
    /// Vocabulary JSON
    pub vocab: PathBuf,
    /// Safetensors weights, absent for tokenizer-only output
    pub weights: Option<PathBuf>,
}

impl PackSources {
    /// Fill unset paths from the model directory.
    pub fn resolve(
        dir: Option<PathBuf>,
        config: Option<PathBuf>,
        vocab: Option<PathBuf>,
        weights: Option<PathBuf>,
        tokenizer_only: bool,
    ) -> Self {
        let base = dir.unwrap_or_else(|| PathBuf::from("."));
        let existing = |name: &str| {
            let path = base.join(name);
            path.exists().then_some(path)
        };

        let config = config.or_else(|| existing("config.json"));
        let vocab = vocab.unwrap_or_else(|| base.join("vocab.json"));
        let weights = if tokenizer_only {
            None
        } else {
            weights.or_else(|| existing("model.safetensors"))
        };

        Self {
            config,
            vocab,
            weights,
        }
    }
}

/// Output settings for a pack run.
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Destination file
    pub output: PathBuf,
    /// Tensor storage type
    pub data_type: DataType,
    /// Context length recorded with the tensors
    pub context_len: i32,
    /// Overrides `model_type` from the config
    pub model_type: Option<String>,
    /// Upstream model identifier
    pub base_model: String,
    /// Author
    pub author: String,
    /// License
    pub license: String,
}

/// Run the pack command
pub fn run(sources: &PackSources, options: &PackOptions) -> Result<()> {
    let start = Instant::now();

    println!("\n{} ALT Packer", "==>".bright_blue().bold());

    let container = build_container(sources, options)?;

    let written = container
        .save(&options.output)
        .with_context(|| format!("Failed to write {}", options.output.display()))?;
    info!(
        path = %options.output.display(),
        bytes = written,
        tensors = container.tensor_count(),
        "packed ALT file"
    );

    println!(
        "\n{} Wrote {} ({}) in {:.2?}",
        "==>".bright_green().bold(),
        options.output.display().to_string().bright_cyan(),
        ByteSize(written),
        start.elapsed()
    );
    Ok(())
}

/// Assemble every section from the inputs.
pub fn build_container(sources: &PackSources, options: &PackOptions) -> Result<Container> {
    let config = match &sources.config {
        Some(path) => {
            println!("{} Config: {}", "-->".bright_blue(), path.display());
            ModelConfig::from_file(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?
        }
        None => {
            println!("{} Config: {}", "-->".bright_blue(), "defaults".dimmed());
            ModelConfig::default()
        }
    };
    let parameters = ParametersRecord::from_config(&config).context("Invalid model config")?;

    println!("{} Vocabulary: {}", "-->".bright_blue(), sources.vocab.display());
    let vocab = Vocabulary::from_file(&sources.vocab)
        .with_context(|| format!("Failed to read vocabulary {}", sources.vocab.display()))?;
    let tokenizer = TokenizerRecord::from_source(&vocab)?;
    print_tokenizer_summary(&tokenizer);

    let model_type = options
        .model_type
        .clone()
        .or_else(|| config.model_type.clone())
        .unwrap_or_default();
    let general = GeneralRecord::new(model_type)
        .with_base_model(options.base_model.as_str())
        .with_author(options.author.as_str())
        .with_license(options.license.as_str());

    let mut container = Container::new(general, parameters, tokenizer);

    if let Some(weights) = &sources.weights {
        println!("{} Weights: {}", "-->".bright_blue(), weights.display());
        let inputs = load_safetensors(weights)?;
        debug!(path = %weights.display(), tensors = inputs.len(), "loaded safetensors");
        let tensors = encode_tensors(inputs, options.data_type, options.context_len)?;
        println!(
            "    {} tensors, {} blocks, payload {} as {}",
            tensors.tensors.len(),
            tensors.block_count(),
            ByteSize(tensors.payload_bytes()),
            options.data_type.name().bright_cyan()
        );
        container = container.with_tensors(tensors);
    } else {
        println!("{} Weights: {}", "-->".bright_blue(), "none (tokenizer only)".dimmed());
    }

    Ok(container)
}

fn print_tokenizer_summary(tokenizer: &TokenizerRecord) {
    let special: Vec<String> = [
        TokenType::Byte,
        TokenType::Control,
        TokenType::Unknown,
        TokenType::Bos,
        TokenType::Eos,
        TokenType::Pad,
    ]
    .into_iter()
    .map(|t| (t, tokenizer.count_of(t)))
    .filter(|(_, n)| *n > 0)
    .map(|(t, n)| format!("{} {n}", t.name()))
    .collect();

    println!(
        "    {} tokens{}",
        tokenizer.vocab_size(),
        if special.is_empty() {
            String::new()
        } else {
            format!(" ({})", special.join(", "))
        }
    );
}

/// Load every tensor from a safetensors file as f32, sorted by name.
pub fn load_safetensors(path: &Path) -> Result<Vec<TensorInput>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file = SafeTensors::deserialize(&bytes)
        .with_context(|| format!("Invalid safetensors file {}", path.display()))?;

    let mut names: Vec<String> = file.names().into_iter().cloned().collect();
    names.sort();

    names
        .into_iter()
        .map(|name| -> Result<TensorInput> {
            let view = file.tensor(&name)?;
            let data = to_f32(view.dtype(), view.data())
                .with_context(|| format!("Tensor {name}"))?;
            Ok(TensorInput::new(name, view.shape().to_vec(), data))
        })
        .collect()
}

fn to_f32(dtype: Dtype, data: &[u8]) -> Result<Vec<f32>> {
    let values = match dtype {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        other => bail!("unsupported source dtype {other:?}; expected F32, F16 or BF16"),
    };
    Ok(values)
}

/// Encode inputs with a progress bar.
pub fn encode_tensors(
    inputs: Vec<TensorInput>,
    data_type: DataType,
    context_len: i32,
) -> Result<TensorsRecord> {
    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("    [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );

    let mut tensors = Vec::with_capacity(inputs.len());
    for input in &inputs {
        pb.set_message(input.name.clone());
        tensors.push(TensorRecord::encode(input, data_type)?);
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(TensorsRecord {
        data_type,
        context_len,
        tensors,
    })
}
