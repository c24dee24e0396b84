//! Validate command implementation
//!
//! Decodes every section, re-derives every derived field and dequantizes
//! every tensor. The first failure aborts with a non-zero exit.

use std::path::Path;

use anyhow::{anyhow, Result};
use colored::Colorize;
use tracing::{info, warn};

use alt_format::{AltError, Container};

/// Counts from a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationReport {
    /// Vocabulary entries
    pub tokens: usize,
    /// Tensor records
    pub tensors: usize,
    /// Elements decoded across all tensors
    pub elements: usize,
}

/// Fully decode a file.
pub fn validate_file(path: &Path) -> std::result::Result<ValidationReport, AltError> {
    let container = Container::load(path)?;
    container.parameters.head_size()?;

    let mut elements = 0;
    if let Some(tensors) = &container.tensors {
        for tensor in &tensors.tensors {
            elements += tensor.to_f32()?.len();
        }
    }

    Ok(ValidationReport {
        tokens: container.tokenizer.vocab_size(),
        tensors: container.tensor_count(),
        elements,
    })
}

/// Run the validate command
pub fn run(path: &Path) -> Result<()> {
    match validate_file(path) {
        Ok(report) => {
            info!(
                path = %path.display(),
                tokens = report.tokens,
                tensors = report.tensors,
                elements = report.elements,
                "validated ALT file"
            );
            println!(
                "{} {} ({} tokens, {} tensors, {} elements)",
                "OK".green().bold(),
                path.display(),
                report.tokens,
                report.tensors,
                report.elements
            );
            Ok(())
        }
        Err(err) => {
            let kind = if err.is_corruption() {
                "corrupt"
            } else {
                "unreadable"
            };
            warn!(path = %path.display(), error = %err, kind, "validation failed");
            println!("{} {} ({kind})", "FAIL".red().bold(), path.display());
            Err(anyhow!(err).context(format!("Validation of {} failed", path.display())))
        }
    }
}
