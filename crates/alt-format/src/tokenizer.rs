//! Tokenizer section: vocabulary, scores and special token ids.
//!
//! Token ids are implicit: entry `i` in the section is token `i`. Token
//! types are computed at build time from a [`TokenSource`] and trusted on
//! read.

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AltError, Result};
use crate::magic::Marker;
use crate::primitive::{record_capacity, string_size, AltReader, AltWriter};
use crate::section::{SectionCodec, SectionHeader};

/// Token category stored per vocabulary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TokenType {
    /// Ordinary piece
    Normal = 0,
    /// Raw byte fallback, e.g. `<0x0A>`
    Byte = 1,
    /// Control symbol
    Control = 2,
    /// Unknown-token placeholder
    Unknown = 3,
    /// Reserved, never produced by encoding
    Unused = 4,
    /// Beginning of sequence
    Bos = 5,
    /// End of sequence
    Eos = 6,
    /// Padding
    Pad = 7,
}

impl TokenType {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            TokenType::Normal => "NORMAL",
            TokenType::Byte => "BYTE",
            TokenType::Control => "CONTROL",
            TokenType::Unknown => "UNKNOWN",
            TokenType::Unused => "UNUSED",
            TokenType::Bos => "BOS",
            TokenType::Eos => "EOS",
            TokenType::Pad => "PAD",
        }
    }
}

impl TryFrom<i32> for TokenType {
    type Error = AltError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(TokenType::Normal),
            1 => Ok(TokenType::Byte),
            2 => Ok(TokenType::Control),
            3 => Ok(TokenType::Unknown),
            4 => Ok(TokenType::Unused),
            5 => Ok(TokenType::Bos),
            6 => Ok(TokenType::Eos),
            7 => Ok(TokenType::Pad),
            other => Err(AltError::InvalidField {
                field: "token_type",
                value: other as i64,
            }),
        }
    }
}

/// Read access to a piece-based vocabulary.
///
/// This is the surface a SentencePiece processor exposes; implement it to
/// feed any tokenizer model into [`TokenizerRecord::from_source`].
pub trait TokenSource {
    /// Number of pieces.
    fn vocab_size(&self) -> usize;
    /// Piece text for `id`.
    fn piece(&self, id: usize) -> &str;
    /// Piece score (log probability for unigram models).
    fn score(&self, id: usize) -> f32;
    /// Byte-fallback piece.
    fn is_byte(&self, id: usize) -> bool;
    /// Control symbol.
    fn is_control(&self, id: usize) -> bool;
    /// Unknown-token piece.
    fn is_unknown(&self, id: usize) -> bool;
    /// Unused piece.
    fn is_unused(&self, id: usize) -> bool;
    /// Beginning-of-sequence id, `-1` if absent.
    fn bos_id(&self) -> i32;
    /// End-of-sequence id, `-1` if absent.
    fn eos_id(&self) -> i32;
    /// Padding id, `-1` if absent.
    fn pad_id(&self) -> i32;
    /// Unknown-token id, `-1` if absent.
    fn unk_id(&self) -> i32;
}

/// Classify one piece. The first matching rule wins:
/// byte, control, unknown, unused, then the literal texts `<s>`, `</s>` and
/// `<pad>`, else normal.
pub fn classify_token<S: TokenSource + ?Sized>(source: &S, id: usize) -> TokenType {
    if source.is_byte(id) {
        return TokenType::Byte;
    }
    if source.is_control(id) {
        return TokenType::Control;
    }
    if source.is_unknown(id) {
        return TokenType::Unknown;
    }
    if source.is_unused(id) {
        return TokenType::Unused;
    }
    match source.piece(id) {
        "<s>" => TokenType::Bos,
        "</s>" => TokenType::Eos,
        "<pad>" => TokenType::Pad,
        _ => TokenType::Normal,
    }
}

// ============================================================================
// JSON vocabulary
// ============================================================================

fn default_bos() -> i32 {
    1
}

fn default_eos() -> i32 {
    2
}

fn default_pad() -> i32 {
    -1
}

fn default_unk() -> i32 {
    0
}

/// One piece of a [`Vocabulary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VocabEntry {
    /// Piece text
    pub text: String,
    /// Piece score
    #[serde(default)]
    pub score: f32,
    /// Byte-fallback flag
    #[serde(default)]
    pub byte: bool,
    /// Control flag
    #[serde(default)]
    pub control: bool,
    /// Unknown flag
    #[serde(default)]
    pub unknown: bool,
    /// Unused flag
    #[serde(default)]
    pub unused: bool,
}

impl VocabEntry {
    /// Plain piece with a score and no flags.
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            ..Default::default()
        }
    }
}

/// A vocabulary supplied as JSON.
///
/// Special ids default to the SentencePiece convention
/// (`unk = 0`, `bos = 1`, `eos = 2`, no pad).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Pieces in id order
    pub tokens: Vec<VocabEntry>,
    /// Beginning-of-sequence id
    #[serde(default = "default_bos")]
    pub bos_id: i32,
    /// End-of-sequence id
    #[serde(default = "default_eos")]
    pub eos_id: i32,
    /// Padding id
    #[serde(default = "default_pad")]
    pub pad_id: i32,
    /// Unknown-token id
    #[serde(default = "default_unk")]
    pub unk_id: i32,
}

impl Vocabulary {
    /// Vocabulary with SentencePiece default special ids.
    pub fn new(tokens: Vec<VocabEntry>) -> Self {
        Self {
            tokens,
            bos_id: default_bos(),
            eos_id: default_eos(),
            pad_id: default_pad(),
            unk_id: default_unk(),
        }
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

impl TokenSource for Vocabulary {
    fn vocab_size(&self) -> usize {
        self.tokens.len()
    }

    fn piece(&self, id: usize) -> &str {
        &self.tokens[id].text
    }

    fn score(&self, id: usize) -> f32 {
        self.tokens[id].score
    }

    fn is_byte(&self, id: usize) -> bool {
        self.tokens[id].byte
    }

    fn is_control(&self, id: usize) -> bool {
        self.tokens[id].control
    }

    fn is_unknown(&self, id: usize) -> bool {
        self.tokens[id].unknown
    }

    fn is_unused(&self, id: usize) -> bool {
        self.tokens[id].unused
    }

    fn bos_id(&self) -> i32 {
        self.bos_id
    }

    fn eos_id(&self) -> i32 {
        self.eos_id
    }

    fn pad_id(&self) -> i32 {
        self.pad_id
    }

    fn unk_id(&self) -> i32 {
        self.unk_id
    }
}

// ============================================================================
// Section record
// ============================================================================

/// One vocabulary entry as stored in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEntry {
    /// Piece text
    pub text: String,
    /// Piece score
    pub score: f32,
    /// Piece category
    pub token_type: TokenType,
}

impl TokenEntry {
    fn encoded_size(&self) -> u64 {
        string_size(&self.text) + 4 + 4
    }
}

/// Body of the Tokenizer section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerRecord {
    /// Beginning-of-sequence id
    pub bos_id: i32,
    /// End-of-sequence id
    pub eos_id: i32,
    /// Padding id
    pub pad_id: i32,
    /// Unknown-token id
    pub unk_id: i32,
    /// Entries in id order
    pub tokens: Vec<TokenEntry>,
}

/// Fixed prefix: vocab_size and four special ids.
const TOKENIZER_PREFIX_SIZE: u64 = 4 * 5;

/// Smallest encoded entry: empty text, score, type.
const MIN_ENTRY_SIZE: u64 = 12;

impl TokenizerRecord {
    /// Build from a token source, classifying every piece.
    pub fn from_source<S: TokenSource + ?Sized>(source: &S) -> Result<Self> {
        let vocab_size = source.vocab_size();
        if i32::try_from(vocab_size).is_err() {
            return Err(AltError::InvalidField {
                field: "vocab_size",
                value: vocab_size as i64,
            });
        }

        let tokens = (0..vocab_size)
            .map(|id| TokenEntry {
                text: source.piece(id).to_string(),
                score: source.score(id),
                token_type: classify_token(source, id),
            })
            .collect();

        Ok(Self {
            bos_id: source.bos_id(),
            eos_id: source.eos_id(),
            pad_id: source.pad_id(),
            unk_id: source.unk_id(),
            tokens,
        })
    }

    /// Number of entries.
    pub fn vocab_size(&self) -> usize {
        self.tokens.len()
    }

    /// Entry for a token id.
    pub fn get(&self, id: usize) -> Option<&TokenEntry> {
        self.tokens.get(id)
    }

    /// Id of the first entry whose text equals `text`.
    pub fn token_id(&self, text: &str) -> Option<usize> {
        self.tokens.iter().position(|t| t.text == text)
    }

    /// Number of entries of a given type.
    pub fn count_of(&self, token_type: TokenType) -> usize {
        self.tokens
            .iter()
            .filter(|t| t.token_type == token_type)
            .count()
    }
}

impl SectionCodec for TokenizerRecord {
    const MARKER: Marker = Marker::Tokenizer;

    fn size(&self) -> u64 {
        TOKENIZER_PREFIX_SIZE + self.tokens.iter().map(TokenEntry::encoded_size).sum::<u64>()
    }

    fn write_body<W: Write>(&self, w: &mut AltWriter<W>) -> Result<()> {
        let vocab_size = i32::try_from(self.tokens.len()).map_err(|_| AltError::InvalidField {
            field: "vocab_size",
            value: self.tokens.len() as i64,
        })?;
        w.write_i32(vocab_size)?;
        w.write_i32(self.bos_id)?;
        w.write_i32(self.eos_id)?;
        w.write_i32(self.pad_id)?;
        w.write_i32(self.unk_id)?;

        for token in &self.tokens {
            w.write_string(&token.text)?;
            w.write_f32(token.score)?;
            w.write_i32(token.token_type.as_i32())?;
        }
        Ok(())
    }

    fn read_body<R: Read>(r: &mut AltReader<R>, header: &SectionHeader) -> Result<Self> {
        let vocab_size = r.read_count("vocab_size")? as usize;
        let bos_id = r.read_i32()?;
        let eos_id = r.read_i32()?;
        let pad_id = r.read_i32()?;
        let unk_id = r.read_i32()?;

        let mut tokens = Vec::with_capacity(record_capacity(
            vocab_size as u64,
            header.body_size.saturating_sub(TOKENIZER_PREFIX_SIZE),
            MIN_ENTRY_SIZE,
        ));
        for _ in 0..vocab_size {
            let text = r.read_string()?;
            let score = r.read_f32()?;
            let token_type = TokenType::try_from(r.read_i32()?)?;
            tokens.push(TokenEntry {
                text,
                score,
                token_type,
            });
        }

        Ok(Self {
            bos_id,
            eos_id,
            pad_id,
            unk_id,
            tokens,
        })
    }
}
