//! Container orchestration.
//!
//! [`ContainerWriter`] and [`ContainerReader`] enforce the section order
//! `Start, General, Parameters, Tokenizer, [Tensors], End`. [`Container`]
//! bundles the decoded records for whole-file reads and writes.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{AltError, Result};
use crate::general::GeneralRecord;
use crate::magic::Marker;
use crate::parameters::ParametersRecord;
use crate::primitive::{AltReader, AltWriter};
use crate::section::{read_end_marker, read_marker, write_end_marker, SectionCodec};
use crate::start::StartRecord;
use crate::tensors::TensorsRecord;
use crate::tokenizer::TokenizerRecord;

/// Progress of a container read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Nothing processed
    Empty,
    /// Start section done
    StartWritten,
    /// General section done
    GeneralWritten,
    /// Parameters section done
    ParametersWritten,
    /// Tokenizer section done
    TokenizerWritten,
    /// Tensors section done
    TensorsWritten,
    /// End marker done
    Finalized,
    /// A section failed; the stream position is unknown and every further
    /// call is rejected
    Failed,
}

/// Run one section step. The state advances only when `step` succeeds; a
/// failing step leaves the state at `Failed`. Calls in the wrong state are
/// rejected without touching the stream.
fn advance<S, T>(
    state: &mut ContainerState,
    stream: &mut S,
    allowed: &[ContainerState],
    next: ContainerState,
    action: &str,
    step: impl FnOnce(&mut S) -> Result<T>,
) -> Result<T> {
    if !allowed.contains(state) {
        return Err(AltError::InvalidState(format!(
            "cannot {action} in state {state:?}"
        )));
    }
    match step(stream) {
        Ok(value) => {
            *state = next;
            Ok(value)
        }
        Err(err) => {
            *state = ContainerState::Failed;
            Err(err)
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Sequential container writer.
///
/// ```rust,ignore
/// let mut writer = ContainerWriter::new(File::create("model.alt")?);
/// writer.write_start()?;
/// writer.write_general(&general)?;
/// writer.write_parameters(&parameters)?;
/// writer.write_tokenizer(&tokenizer)?;
/// writer.write_tensors(&tensors)?;
/// let file = writer.finish()?;
/// ```
pub struct ContainerWriter<W: Write> {
    writer: AltWriter<W>,
    state: ContainerState,
}

impl<W: Write> ContainerWriter<W> {
    /// Wrap a stream positioned at the start of the file.
    pub fn new(inner: W) -> Self {
        Self {
            writer: AltWriter::new(inner),
            state: ContainerState::Empty,
        }
    }

    /// Current state.
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.writer.position()
    }

    /// Write the Start section.
    pub fn write_start(&mut self) -> Result<()> {
        advance(
            &mut self.state,
            &mut self.writer,
            &[ContainerState::Empty],
            ContainerState::StartWritten,
            "write Start",
            |w| StartRecord::default().write(w).map(drop),
        )
    }

    /// Write the General section.
    pub fn write_general(&mut self, general: &GeneralRecord) -> Result<()> {
        advance(
            &mut self.state,
            &mut self.writer,
            &[ContainerState::StartWritten],
            ContainerState::GeneralWritten,
            "write General",
            |w| general.write(w).map(drop),
        )
    }

    /// Write the Parameters section.
    pub fn write_parameters(&mut self, parameters: &ParametersRecord) -> Result<()> {
        advance(
            &mut self.state,
            &mut self.writer,
            &[ContainerState::GeneralWritten],
            ContainerState::ParametersWritten,
            "write Parameters",
            |w| parameters.write(w).map(drop),
        )
    }

    /// Write the Tokenizer section.
    pub fn write_tokenizer(&mut self, tokenizer: &TokenizerRecord) -> Result<()> {
        advance(
            &mut self.state,
            &mut self.writer,
            &[ContainerState::ParametersWritten],
            ContainerState::TokenizerWritten,
            "write Tokenizer",
            |w| tokenizer.write(w).map(drop),
        )
    }

    /// Write the optional Tensors section.
    pub fn write_tensors(&mut self, tensors: &TensorsRecord) -> Result<()> {
        advance(
            &mut self.state,
            &mut self.writer,
            &[ContainerState::TokenizerWritten],
            ContainerState::TensorsWritten,
            "write Tensors",
            |w| tensors.write(w).map(drop),
        )
    }

    /// Write the End marker and flush.
    pub fn finalize(&mut self) -> Result<()> {
        advance(
            &mut self.state,
            &mut self.writer,
            &[ContainerState::TokenizerWritten, ContainerState::TensorsWritten],
            ContainerState::Finalized,
            "write End",
            |w| {
                write_end_marker(w)?;
                w.flush()
            },
        )
    }

    /// Finalize and release the stream.
    pub fn finish(mut self) -> Result<W> {
        self.finalize()?;
        Ok(self.writer.into_inner())
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Sequential container reader, the mirror of [`ContainerWriter`].
pub struct ContainerReader<R: Read> {
    reader: AltReader<R>,
    state: ContainerState,
}

impl<R: Read> ContainerReader<R> {
    /// Wrap a stream positioned at the start of the file.
    pub fn new(inner: R) -> Self {
        Self {
            reader: AltReader::new(inner),
            state: ContainerState::Empty,
        }
    }

    /// Current state.
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Read and validate the Start section.
    pub fn read_start(&mut self) -> Result<StartRecord> {
        advance(
            &mut self.state,
            &mut self.reader,
            &[ContainerState::Empty],
            ContainerState::StartWritten,
            "read Start",
            StartRecord::read,
        )
    }

    /// Read the General section.
    pub fn read_general(&mut self) -> Result<GeneralRecord> {
        advance(
            &mut self.state,
            &mut self.reader,
            &[ContainerState::StartWritten],
            ContainerState::GeneralWritten,
            "read General",
            GeneralRecord::read,
        )
    }

    /// Read the Parameters section.
    pub fn read_parameters(&mut self) -> Result<ParametersRecord> {
        advance(
            &mut self.state,
            &mut self.reader,
            &[ContainerState::GeneralWritten],
            ContainerState::ParametersWritten,
            "read Parameters",
            ParametersRecord::read,
        )
    }

    /// Read the Tokenizer section.
    pub fn read_tokenizer(&mut self) -> Result<TokenizerRecord> {
        advance(
            &mut self.state,
            &mut self.reader,
            &[ContainerState::ParametersWritten],
            ContainerState::TokenizerWritten,
            "read Tokenizer",
            TokenizerRecord::read,
        )
    }

    /// Read the optional Tensors section and the End marker.
    pub fn read_tensors_and_end(&mut self) -> Result<Option<TensorsRecord>> {
        advance(
            &mut self.state,
            &mut self.reader,
            &[ContainerState::TokenizerWritten],
            ContainerState::Finalized,
            "read Tensors",
            |r| match read_marker(r)? {
                Marker::Tensors => {
                    let tensors = TensorsRecord::read_framed(r)?;
                    read_end_marker(r)?;
                    Ok(Some(tensors))
                }
                Marker::End => Ok(None),
                found => Err(AltError::WrongSection {
                    expected: Marker::Tensors,
                    found,
                }),
            },
        )
    }

    /// Release the stream.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

// ============================================================================
// Whole-file API
// ============================================================================

/// Decoded contents of an ALT file.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    /// Identity metadata
    pub general: GeneralRecord,
    /// Hyperparameters
    pub parameters: ParametersRecord,
    /// Vocabulary
    pub tokenizer: TokenizerRecord,
    /// Weights, absent in tokenizer-only files
    pub tensors: Option<TensorsRecord>,
}

impl Container {
    /// Container without tensors.
    pub fn new(
        general: GeneralRecord,
        parameters: ParametersRecord,
        tokenizer: TokenizerRecord,
    ) -> Self {
        Self {
            general,
            parameters,
            tokenizer,
            tensors: None,
        }
    }

    /// Attach a Tensors section.
    pub fn with_tensors(mut self, tensors: TensorsRecord) -> Self {
        self.tensors = Some(tensors);
        self
    }

    /// Write every section to `inner` and return it.
    pub fn write_to<W: Write>(&self, inner: W) -> Result<W> {
        let mut writer = ContainerWriter::new(inner);
        writer.write_start()?;
        writer.write_general(&self.general)?;
        writer.write_parameters(&self.parameters)?;
        writer.write_tokenizer(&self.tokenizer)?;
        if let Some(tensors) = &self.tensors {
            writer.write_tensors(tensors)?;
        }
        let bytes = writer.position();
        let inner = writer.finish()?;
        debug!(bytes = bytes + 8, "container written");
        Ok(inner)
    }

    /// Read every section from `inner`.
    pub fn read_from<R: Read>(inner: R) -> Result<Self> {
        let mut reader = ContainerReader::new(inner);
        Self::read_sections(&mut reader)
    }

    fn read_sections<R: Read>(reader: &mut ContainerReader<R>) -> Result<Self> {
        reader.read_start()?;
        let general = reader.read_general()?;
        let parameters = reader.read_parameters()?;
        let tokenizer = reader.read_tokenizer()?;
        let tensors = reader.read_tensors_and_end()?;
        Ok(Self {
            general,
            parameters,
            tokenizer,
            tensors,
        })
    }

    /// Encode to a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.write_to(Vec::new())
    }

    /// Decode from a byte slice. Bytes after the End marker are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ContainerReader::new(bytes);
        let container = Self::read_sections(&mut reader)?;
        let trailing = bytes.len() as u64 - reader.position();
        if trailing != 0 {
            return Err(AltError::InvalidField {
                field: "trailing bytes",
                value: trailing as i64,
            });
        }
        Ok(container)
    }

    /// Write to a file. A partially written file is removed on failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let result = File::create(path)
            .map_err(AltError::from)
            .and_then(|file| self.write_to(BufWriter::new(file)))
            .and_then(|writer| writer.into_inner().map_err(|e| AltError::Io(e.into_error())))
            .and_then(|file| Ok(file.metadata()?.len()));

        match result {
            Ok(bytes) => {
                info!(path = %path.display(), bytes, "saved ALT container");
                Ok(bytes)
            }
            Err(err) => {
                if let Err(cleanup) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %cleanup, "failed to remove partial file");
                }
                Err(err)
            }
        }
    }

    /// Read a file. Bytes after the End marker are rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut reader = ContainerReader::new(BufReader::new(file));
        let container = Self::read_sections(&mut reader)?;
        let trailing = len.saturating_sub(reader.position());
        if trailing != 0 {
            return Err(AltError::InvalidField {
                field: "trailing bytes",
                value: trailing as i64,
            });
        }

        info!(
            path = %path.display(),
            bytes = len,
            vocab_size = container.tokenizer.vocab_size(),
            tensors = container.tensors.as_ref().map_or(0, |t| t.tensors.len()),
            "loaded ALT container"
        );
        Ok(container)
    }

    /// Number of tensors, zero for tokenizer-only files.
    pub fn tensor_count(&self) -> usize {
        self.tensors.as_ref().map_or(0, |t| t.tensors.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{VocabEntry, Vocabulary};

    fn sample() -> Container {
        let vocab = Vocabulary::new(vec![
            VocabEntry::new("<unk>", 0.0),
            VocabEntry::new("<s>", 0.0),
            VocabEntry::new("</s>", 0.0),
        ]);
        Container::new(
            GeneralRecord::new("mistral"),
            ParametersRecord::default(),
            TokenizerRecord::from_source(&vocab).unwrap(),
        )
    }

    #[test]
    fn test_writer_rejects_out_of_order_calls() {
        let container = sample();
        let mut writer = ContainerWriter::new(Vec::new());
        assert!(matches!(
            writer.write_general(&container.general),
            Err(AltError::InvalidState(_))
        ));
        assert_eq!(writer.state(), ContainerState::Empty);
        assert_eq!(writer.position(), 0);

        writer.write_start().unwrap();
        assert!(matches!(writer.write_start(), Err(AltError::InvalidState(_))));
        assert!(matches!(
            writer.write_tokenizer(&container.tokenizer),
            Err(AltError::InvalidState(_))
        ));
        assert!(matches!(writer.finalize(), Err(AltError::InvalidState(_))));
    }

    #[test]
    fn test_writer_rejects_writes_after_finalize() {
        let container = sample();
        let mut writer = ContainerWriter::new(Vec::new());
        writer.write_start().unwrap();
        writer.write_general(&container.general).unwrap();
        writer.write_parameters(&container.parameters).unwrap();
        writer.write_tokenizer(&container.tokenizer).unwrap();
        writer.finalize().unwrap();
        assert_eq!(writer.state(), ContainerState::Finalized);
        assert!(matches!(writer.finalize(), Err(AltError::InvalidState(_))));
    }

    /// Accepts `budget` bytes, then fails every write.
    struct ShortWriter {
        written: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.written.len() + buf.len() > self.budget {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_poisons_writer() {
        let container = sample();
        let mut writer = ContainerWriter::new(ShortWriter {
            written: Vec::new(),
            budget: 40,
        });
        writer.write_start().unwrap();
        assert!(matches!(
            writer.write_general(&container.general),
            Err(AltError::Io(_))
        ));
        assert_eq!(writer.state(), ContainerState::Failed);

        assert!(matches!(
            writer.write_parameters(&container.parameters),
            Err(AltError::InvalidState(_))
        ));
        assert!(matches!(writer.finalize(), Err(AltError::InvalidState(_))));
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_rejected_tensors_do_not_allow_end_marker() {
        use crate::quantization::DataType;
        use crate::tensors::{TensorInput, TensorsOptions};

        let container = sample();
        let input = TensorInput::new("model.norm.weight", vec![2], vec![1.0, 2.0]);
        let mut tensors = TensorsRecord::from_inputs(vec![input], &TensorsOptions::new()).unwrap();
        tensors.tensors[0].data_type = DataType::QInt8;

        let mut writer = ContainerWriter::new(Vec::new());
        writer.write_start().unwrap();
        writer.write_general(&container.general).unwrap();
        writer.write_parameters(&container.parameters).unwrap();
        writer.write_tokenizer(&container.tokenizer).unwrap();
        assert!(writer.write_tensors(&tensors).is_err());
        assert_eq!(writer.state(), ContainerState::Failed);

        let before = writer.position();
        assert!(matches!(writer.finalize(), Err(AltError::InvalidState(_))));
        assert_eq!(writer.position(), before);
    }

    #[test]
    fn test_failed_read_poisons_reader() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[16..20].copy_from_slice(&3i32.to_le_bytes());

        let mut reader = ContainerReader::new(bytes.as_slice());
        assert!(matches!(
            reader.read_start(),
            Err(AltError::VersionUnsupported(3))
        ));
        assert_eq!(reader.state(), ContainerState::Failed);
        assert!(matches!(reader.read_general(), Err(AltError::InvalidState(_))));
        assert!(matches!(
            reader.read_tensors_and_end(),
            Err(AltError::InvalidState(_))
        ));
    }

    #[test]
    fn test_reader_states() {
        let bytes = sample().to_bytes().unwrap();
        let mut reader = ContainerReader::new(bytes.as_slice());
        assert!(matches!(reader.read_general(), Err(AltError::InvalidState(_))));
        reader.read_start().unwrap();
        reader.read_general().unwrap();
        reader.read_parameters().unwrap();
        reader.read_tokenizer().unwrap();
        assert!(reader.read_tensors_and_end().unwrap().is_none());
        assert_eq!(reader.state(), ContainerState::Finalized);
        assert_eq!(reader.position(), bytes.len() as u64);
    }

    #[test]
    fn test_bytes_round_trip() {
        let container = sample();
        let bytes = container.to_bytes().unwrap();
        assert_eq!(bytes.len() % 32, 8);
        assert_eq!(Container::from_bytes(&bytes).unwrap(), container);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            Container::from_bytes(&bytes),
            Err(AltError::InvalidField { field: "trailing bytes", value: 1 })
        ));
    }
}
