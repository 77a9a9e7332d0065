//! Where a patch record came from.
//!
//! Provenance is display/audit metadata only. It is stored as a small JSON
//! object whose marker key names the variant:
//!
//! ```text
//! {"synthsource":true,"timestamp":"2024-03-01T10:00:00.000Z","banknumber":2}
//! {"filesource":true,"filename":"a.syx","fullpath":"/x/a.syx","program":5}
//! {"bulksource":true,"timestamp":"...","fileInBulk":"<nested json string>"}
//! ```
//!
//! Parsing fails closed: anything unrecognized yields `None`.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::program::BankNumber;

const KEY_FILE_SOURCE: &str = "filesource";
const KEY_SYNTH_SOURCE: &str = "synthsource";
const KEY_BULK_SOURCE: &str = "bulksource";
const KEY_FILE_IN_BULK: &str = "fileInBulk";
const KEY_FILENAME: &str = "filename";
const KEY_FULLPATH: &str = "fullpath";
const KEY_TIMESTAMP: &str = "timestamp";
const KEY_BANK_NUMBER: &str = "banknumber";
const KEY_PROGRAM: &str = "program";

#[derive(Debug, Clone, PartialEq)]
pub enum Provenance {
    /// Downloaded from a device. Legacy records carry no timestamp.
    FromSynth {
        timestamp: Option<DateTime<Utc>>,
        bank: Option<BankNumber>,
    },
    /// Loaded from a sysex file; `program` is the position inside that file.
    FromFile {
        filename: String,
        fullpath: String,
        program: u32,
    },
    /// One of many records brought in by a single bulk operation.
    FromBulkImport {
        timestamp: Option<DateTime<Utc>>,
        individual: Option<Box<Provenance>>,
    },
}

impl Provenance {
    pub fn bulk(timestamp: DateTime<Utc>, individual: Option<Provenance>) -> Self {
        Provenance::FromBulkImport {
            timestamp: Some(timestamp),
            individual: individual.map(Box::new),
        }
    }

    /// The per-item provenance beneath a bulk wrapper, if any.
    pub fn individual(&self) -> Option<&Provenance> {
        match self {
            Provenance::FromBulkImport { individual, .. } => individual.as_deref(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        match self {
            Provenance::FromSynth { timestamp, bank } => {
                obj.insert(KEY_SYNTH_SOURCE.into(), Value::Bool(true));
                if let Some(ts) = timestamp {
                    obj.insert(KEY_TIMESTAMP.into(), json!(format_timestamp(ts)));
                }
                if let Some(bank) = bank {
                    obj.insert(KEY_BANK_NUMBER.into(), json!(bank.zero_based()));
                }
            }
            Provenance::FromFile {
                filename,
                fullpath,
                program,
            } => {
                obj.insert(KEY_FILE_SOURCE.into(), Value::Bool(true));
                obj.insert(KEY_FILENAME.into(), json!(filename));
                obj.insert(KEY_FULLPATH.into(), json!(fullpath));
                obj.insert(KEY_PROGRAM.into(), json!(program));
            }
            Provenance::FromBulkImport {
                timestamp,
                individual,
            } => {
                obj.insert(KEY_BULK_SOURCE.into(), Value::Bool(true));
                if let Some(ts) = timestamp {
                    obj.insert(KEY_TIMESTAMP.into(), json!(format_timestamp(ts)));
                }
                if let Some(inner) = individual {
                    // Nested provenance is stored as a string, not an object
                    obj.insert(KEY_FILE_IN_BULK.into(), json!(inner.to_json_string()));
                }
            }
        }
        Value::Object(obj)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn from_json_str(s: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(s).ok()?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.contains_key(KEY_FILE_SOURCE) {
            Some(Provenance::FromFile {
                filename: obj.get(KEY_FILENAME)?.as_str()?.to_string(),
                fullpath: obj.get(KEY_FULLPATH)?.as_str()?.to_string(),
                program: u32::try_from(obj.get(KEY_PROGRAM)?.as_u64()?).ok()?,
            })
        } else if obj.contains_key(KEY_SYNTH_SOURCE) {
            let bank = match obj.get(KEY_BANK_NUMBER) {
                Some(v) => Some(BankNumber::new(u32::try_from(v.as_u64()?).ok()?)),
                None => None,
            };
            Some(Provenance::FromSynth {
                timestamp: parse_timestamp(obj),
                bank,
            })
        } else if obj.contains_key(KEY_BULK_SOURCE) {
            let individual = obj
                .get(KEY_FILE_IN_BULK)
                .and_then(Value::as_str)
                .and_then(Self::from_json_str)
                .map(Box::new);
            Some(Provenance::FromBulkImport {
                timestamp: parse_timestamp(obj),
                individual,
            })
        } else {
            None
        }
    }

    /// Human-readable description. `bank_name` resolves a bank to the
    /// device's own naming (e.g. "A", "Bank 2").
    pub fn display_string(&self, bank_name: &dyn Fn(BankNumber) -> String) -> String {
        match self {
            Provenance::FromSynth { timestamp, bank } => {
                let bank = bank
                    .map(|b| format!(" bank {}", bank_name(b)))
                    .unwrap_or_default();
                match timestamp {
                    Some(ts) => format!("Imported from synth{} at {}", bank, format_local(ts)),
                    None => format!("Imported from synth{}", bank),
                }
            }
            Provenance::FromFile { filename, .. } => format!("Imported from file {}", filename),
            Provenance::FromBulkImport { timestamp, .. } => match timestamp {
                Some(ts) => format!("Bulk file import {}", format_local(ts)),
                None => "Bulk file import".to_string(),
            },
        }
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_local(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%x at %X").to_string()
}

fn parse_timestamp(obj: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let s = obj.get(KEY_TIMESTAMP)?.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
