//! Inspect command implementation
//!
//! Walks an ALT file section by section and prints offsets, sizes and the
//! decoded metadata.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use colored::Colorize;
use prettytable::{row, Table};
use serde_json::json;

use alt_format::{
    ContainerReader, GeneralRecord, Marker, ParametersRecord, TensorClass, TensorsRecord,
    TokenizerRecord,
};

/// Where one section sits in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpan {
    /// Section kind
    pub marker: Marker,
    /// Absolute offset of the marker
    pub offset: u64,
    /// Bytes including header and padding
    pub len: u64,
}

/// Everything read from a file.
#[derive(Debug)]
pub struct Inspection {
    /// File size
    pub file_len: u64,
    /// Section layout in file order
    pub spans: Vec<SectionSpan>,
    /// General section
    pub general: GeneralRecord,
    /// Parameters section
    pub parameters: ParametersRecord,
    /// Tokenizer section
    pub tokenizer: TokenizerRecord,
    /// Tensors section, if present
    pub tensors: Option<TensorsRecord>,
}

/// Read a file, recording the span of every section.
pub fn inspect_file(path: &Path) -> Result<Inspection> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let file_len = file.metadata()?.len();
    let mut reader = ContainerReader::new(BufReader::new(file));
    let mut spans = Vec::with_capacity(6);

    let mut track = |reader: &ContainerReader<_>, marker: Marker, offset: u64| {
        spans.push(SectionSpan {
            marker,
            offset,
            len: reader.position() - offset,
        });
    };

    let at = reader.position();
    reader.read_start().context("Start section")?;
    track(&reader, Marker::Start, at);

    let at = reader.position();
    let general = reader.read_general().context("General section")?;
    track(&reader, Marker::General, at);

    let at = reader.position();
    let parameters = reader.read_parameters().context("Parameters section")?;
    track(&reader, Marker::Parameters, at);

    let at = reader.position();
    let tokenizer = reader.read_tokenizer().context("Tokenizer section")?;
    track(&reader, Marker::Tokenizer, at);

    let at = reader.position();
    let tensors = reader.read_tensors_and_end().context("Tensors section")?;
    let end_at = reader.position() - 8;
    if tensors.is_some() {
        track(&reader, Marker::Tensors, at);
        if let Some(span) = spans.last_mut() {
            span.len -= 8;
        }
    }
    spans.push(SectionSpan {
        marker: Marker::End,
        offset: end_at,
        len: 8,
    });

    Ok(Inspection {
        file_len,
        spans,
        general,
        parameters,
        tokenizer,
        tensors,
    })
}

/// Run the inspect command
pub fn run(path: &Path, list_tensors: bool, as_json: bool) -> Result<()> {
    let inspection = inspect_file(path)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&to_json(&inspection))?);
        return Ok(());
    }

    println!();
    println!(
        "{} {} ({})",
        "ALT file:".bold().cyan(),
        path.display(),
        ByteSize(inspection.file_len)
    );
    println!();

    print_layout(&inspection.spans);
    print_general(&inspection.general);
    print_parameters(&inspection.parameters)?;
    print_tokenizer(&inspection.tokenizer);

    match &inspection.tensors {
        Some(tensors) => {
            print_tensors(tensors);
            if list_tensors {
                print_tensor_table(tensors);
            }
        }
        None => {
            println!("{}", "Tensors:".bold());
            println!("  {}", "none (tokenizer only)".dimmed());
        }
    }
    println!();
    Ok(())
}

fn print_layout(spans: &[SectionSpan]) {
    println!("{}", "Layout:".bold());
    for span in spans {
        println!(
            "  {:<11} {} {:>10}  {}",
            span.marker.name().cyan(),
            "@".dimmed(),
            span.offset,
            ByteSize(span.len)
        );
    }
    println!();
}

fn print_general(general: &GeneralRecord) {
    let or_dash = |s: &str| if s.is_empty() { "-".to_string() } else { s.to_string() };
    println!("{}", "General:".bold());
    println!("  {} {}", "Model Type:".dimmed(), or_dash(&general.model_type));
    println!("  {} {}", "Base Model:".dimmed(), or_dash(&general.base_model));
    println!("  {} {}", "Author:".dimmed(), or_dash(&general.author));
    println!("  {} {}", "Created:".dimmed(), or_dash(&general.created_at));
    println!("  {} {}", "Modified:".dimmed(), or_dash(&general.last_modified));
    println!("  {} {}", "License:".dimmed(), or_dash(&general.license));
    println!("  {} {}", "UUID:".dimmed(), or_dash(&general.uuid));
    println!();
}

fn print_parameters(p: &ParametersRecord) -> Result<()> {
    println!("{}", "Parameters:".bold());
    println!("  {} {}", "Activation:".dimmed(), p.hidden_act);
    println!("  {} {}", "Hidden Size:".dimmed(), p.hidden_size);
    println!("  {} {}", "Intermediate:".dimmed(), p.intermediate_size);
    println!("  {} {}", "Layers:".dimmed(), p.num_hidden_layers);
    println!(
        "  {} {} ({} kv, head size {})",
        "Heads:".dimmed(),
        p.num_attention_heads,
        p.num_key_value_heads,
        p.head_size()?
    );
    println!("  {} {}", "Max Positions:".dimmed(), p.max_position_embeddings);
    println!("  {} {}", "Sliding Window:".dimmed(), p.sliding_window);
    println!("  {} {}", "RoPE Theta:".dimmed(), p.rope_theta);
    println!("  {} {:e}", "RMS Norm Eps:".dimmed(), p.rms_norm_eps);
    println!("  {} {}", "Tied Embeddings:".dimmed(), p.tie_word_embeddings);
    println!();
    Ok(())
}

fn print_tokenizer(t: &TokenizerRecord) {
    let name = |id: i32| {
        usize::try_from(id)
            .ok()
            .and_then(|i| t.get(i))
            .map_or_else(|| "-".to_string(), |e| format!("{id} {:?}", e.text))
    };
    println!("{}", "Tokenizer:".bold());
    println!("  {} {}", "Vocab Size:".dimmed(), t.vocab_size());
    println!("  {} {}", "BOS:".dimmed(), name(t.bos_id));
    println!("  {} {}", "EOS:".dimmed(), name(t.eos_id));
    println!("  {} {}", "PAD:".dimmed(), name(t.pad_id));
    println!("  {} {}", "UNK:".dimmed(), name(t.unk_id));
    println!();
}

fn print_tensors(tensors: &TensorsRecord) {
    println!("{}", "Tensors:".bold());
    println!("  {} {}", "Count:".dimmed(), tensors.tensors.len());
    println!("  {} {}", "Data Type:".dimmed(), tensors.data_type.name());
    println!("  {} {}", "Context:".dimmed(), tensors.context_len);
    println!("  {} {}", "Blocks:".dimmed(), tensors.block_count());
    println!("  {} {}", "Unique:".dimmed(), tensors.unique_count());
    println!("  {} {}", "Payload:".dimmed(), ByteSize(tensors.payload_bytes()));
}

fn describe(class: &TensorClass) -> String {
    match class {
        TensorClass::Layered {
            block,
            layer_type,
            projection,
        } => format!("block {block} {layer_type:?}/{projection:?}"),
        other => other.component_type().name().to_string(),
    }
}

fn print_tensor_table(tensors: &TensorsRecord) {
    let mut table = Table::new();
    table.add_row(row!["Name", "Class", "Shape", "Type", "Bytes"]);
    for t in &tensors.tensors {
        table.add_row(row![
            t.name,
            describe(&t.class),
            format!("{:?}", t.shape),
            t.data_type.name(),
            ByteSize(t.payload.len() as u64)
        ]);
    }
    println!();
    table.printstd();
}

fn to_json(inspection: &Inspection) -> serde_json::Value {
    let spans: Vec<_> = inspection
        .spans
        .iter()
        .map(|s| json!({"section": s.marker.name(), "offset": s.offset, "len": s.len}))
        .collect();

    json!({
        "file_len": inspection.file_len,
        "layout": spans,
        "general": inspection.general,
        "parameters": inspection.parameters,
        "tokenizer": {
            "vocab_size": inspection.tokenizer.vocab_size(),
            "bos_id": inspection.tokenizer.bos_id,
            "eos_id": inspection.tokenizer.eos_id,
            "pad_id": inspection.tokenizer.pad_id,
            "unk_id": inspection.tokenizer.unk_id,
        },
        "tensors": inspection.tensors.as_ref().map(|t| json!({
            "data_type": t.data_type.name(),
            "context_len": t.context_len,
            "block_count": t.block_count(),
            "unique_count": t.unique_count(),
            "payload_bytes": t.payload_bytes(),
            "records": t.tensors,
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alt_format::{
        Container, DataType, TensorInput, TensorsOptions, VocabEntry, Vocabulary,
    };

    fn write_sample(path: &Path, with_tensors: bool) {
        let vocab = Vocabulary::new(vec![VocabEntry::new("a", 0.0), VocabEntry::new("b", -1.0)]);
        let mut container = Container::new(
            GeneralRecord::new("llama"),
            ParametersRecord::default(),
            TokenizerRecord::from_source(&vocab).unwrap(),
        );
        if with_tensors {
            let inputs = vec![TensorInput::new("model.norm.weight", vec![3], vec![1.0, 2.0, 3.0])];
            let options = TensorsOptions::new().with_data_type(DataType::Float16);
            container = container.with_tensors(TensorsRecord::from_inputs(inputs, &options).unwrap());
        }
        container.save(path).unwrap();
    }

    #[test]
    fn test_spans_cover_file() {
        for with_tensors in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("m.alt");
            write_sample(&path, with_tensors);

            let inspection = inspect_file(&path).unwrap();
            let expected = if with_tensors { 6 } else { 5 };
            assert_eq!(inspection.spans.len(), expected);

            let mut next = 0;
            for span in &inspection.spans {
                assert_eq!(span.offset, next, "{}", span.marker);
                assert_eq!(span.offset % 32, 0);
                next = span.offset + span.len;
            }
            assert_eq!(next, inspection.file_len);
            assert_eq!(inspection.spans.last().map(|s| s.marker), Some(Marker::End));
        }
    }

    #[test]
    fn test_json_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.alt");
        write_sample(&path, true);

        let value = to_json(&inspect_file(&path).unwrap());
        assert_eq!(value["tokenizer"]["vocab_size"], 2);
        assert_eq!(value["general"]["model_type"], "llama");
        assert_eq!(value["tensors"]["data_type"], "float16");
        assert_eq!(value["layout"][0]["section"], "Start");
    }

    #[test]
    fn test_corrupt_file_reports_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.alt");
        write_sample(&path, false);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[16..20].copy_from_slice(&1i32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let err = inspect_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Start section"));
    }
}
