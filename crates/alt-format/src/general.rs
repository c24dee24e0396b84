//! General section: model identity strings.

use std::io::{Read, Write};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::magic::Marker;
use crate::primitive::{string_size, AltReader, AltWriter};
use crate::section::{SectionCodec, SectionHeader};

/// Identity metadata. Every field is written, absent data as `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralRecord {
    /// Architecture family, e.g. `"mistral"`
    pub model_type: String,
    /// Upstream model this file was converted from
    pub base_model: String,
    /// Author or organisation
    pub author: String,
    /// RFC 3339 creation time
    pub created_at: String,
    /// RFC 3339 time of last modification
    pub last_modified: String,
    /// License identifier
    pub license: String,
    /// Unique identifier of this model file
    pub uuid: String,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl GeneralRecord {
    /// Create a record with a fresh v4 uuid and both timestamps set to now.
    pub fn new(model_type: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            model_type: model_type.into(),
            created_at: now.clone(),
            last_modified: now,
            uuid: Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    /// Set the base model.
    pub fn with_base_model(mut self, base_model: impl Into<String>) -> Self {
        self.base_model = base_model.into();
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the license.
    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = license.into();
        self
    }

    /// Refresh `last_modified` to the current time.
    pub fn touch(&mut self) {
        self.last_modified = now_rfc3339();
    }

    fn fields(&self) -> [&str; 7] {
        [
            &self.model_type,
            &self.base_model,
            &self.author,
            &self.created_at,
            &self.last_modified,
            &self.license,
            &self.uuid,
        ]
    }
}

impl SectionCodec for GeneralRecord {
    const MARKER: Marker = Marker::General;

    fn size(&self) -> u64 {
        self.fields().iter().map(|s| string_size(s)).sum()
    }

    fn write_body<W: Write>(&self, w: &mut AltWriter<W>) -> Result<()> {
        for field in self.fields() {
            w.write_string(field)?;
        }
        Ok(())
    }

    fn read_body<R: Read>(r: &mut AltReader<R>, _header: &SectionHeader) -> Result<Self> {
        Ok(Self {
            model_type: r.read_string()?,
            base_model: r.read_string()?,
            author: r.read_string()?,
            created_at: r.read_string()?,
            last_modified: r.read_string()?,
            license: r.read_string()?,
            uuid: r.read_string()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(record: &GeneralRecord) -> GeneralRecord {
        let mut w = AltWriter::new(Vec::new());
        record.write(&mut w).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len() % 32, 0);
        GeneralRecord::read(&mut AltReader::new(Cursor::new(bytes))).unwrap()
    }

    #[test]
    fn test_new_fills_identity() {
        let record = GeneralRecord::new("mistral");
        assert_eq!(record.model_type, "mistral");
        assert!(Uuid::parse_str(&record.uuid).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(&record.created_at).is_ok());
        assert_eq!(record.created_at, record.last_modified);
        assert!(record.license.is_empty());
    }

    #[test]
    fn test_general_round_trip() {
        let record = GeneralRecord::new("mistral")
            .with_base_model("mistralai/Mistral-7B-v0.1")
            .with_author("Mistral AI")
            .with_license("apache-2.0");
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_empty_record_is_seven_length_prefixes() {
        let record = GeneralRecord::default();
        assert_eq!(record.size(), 28);
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_touch_keeps_valid_timestamp() {
        let mut record = GeneralRecord::new("llama");
        record.touch();
        assert!(chrono::DateTime::parse_from_rfc3339(&record.last_modified).is_ok());
    }
}
