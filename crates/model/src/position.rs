use crate::core::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("Malformed ingest position '{0}'")]
    Malformed(String),

    #[error("Key value {value} does not fit a {expected} primary key position")]
    KeyTypeMismatch { expected: KeyType, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Integer,
    String,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Integer => f.write_str("integer"),
            KeyType::String => f.write_str("string"),
        }
    }
}

/// Resumable cursor over an ordered unique-key range. `begin` is the last key already
/// handed over (or the inclusive start of the range), `end` the inclusive upper bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimaryKeyPosition {
    Integer {
        begin: Option<i64>,
        end: Option<i64>,
    },
    String {
        begin: Option<String>,
        end: Option<String>,
    },
}

impl PrimaryKeyPosition {
    pub fn new(
        key_type: KeyType,
        begin: Option<&Value>,
        end: Option<&Value>,
    ) -> Result<Self, PositionError> {
        match key_type {
            KeyType::Integer => Ok(PrimaryKeyPosition::Integer {
                begin: begin.map(int_key).transpose()?,
                end: end.map(int_key).transpose()?,
            }),
            KeyType::String => Ok(PrimaryKeyPosition::String {
                begin: begin.map(string_key).transpose()?,
                end: end.map(string_key).transpose()?,
            }),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            PrimaryKeyPosition::Integer { .. } => KeyType::Integer,
            PrimaryKeyPosition::String { .. } => KeyType::String,
        }
    }

    pub fn begin_value(&self) -> Option<Value> {
        match self {
            PrimaryKeyPosition::Integer { begin, .. } => begin.map(Value::Int),
            PrimaryKeyPosition::String { begin, .. } => begin.clone().map(Value::String),
        }
    }

    pub fn end_value(&self) -> Option<Value> {
        match self {
            PrimaryKeyPosition::Integer { end, .. } => end.map(Value::Int),
            PrimaryKeyPosition::String { end, .. } => end.clone().map(Value::String),
        }
    }

    /// Same range, cursor moved to `begin`.
    pub fn with_begin(&self, begin: &Value) -> Result<Self, PositionError> {
        PrimaryKeyPosition::new(self.key_type(), Some(begin), self.end_value().as_ref())
    }

    fn same_range(&self, other: &PrimaryKeyPosition) -> bool {
        self.key_type() == other.key_type() && self.end_value() == other.end_value()
    }

    fn begin_not_after(&self, other: &PrimaryKeyPosition) -> bool {
        match (self.begin_value(), other.begin_value()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a <= b,
        }
    }
}

fn int_key(value: &Value) -> Result<i64, PositionError> {
    match value {
        Value::Int(v) => Ok(*v),
        other => Err(PositionError::KeyTypeMismatch {
            expected: KeyType::Integer,
            value: other.to_string(),
        }),
    }
}

fn string_key(value: &Value) -> Result<String, PositionError> {
    match value {
        Value::String(v) => Ok(v.clone()),
        other => Err(PositionError::KeyTypeMismatch {
            expected: KeyType::String,
            value: other.to_string(),
        }),
    }
}

/// Checkpoint describing how far one inventory or incremental task has progressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum IngestPosition {
    /// Not started.
    #[default]
    Placeholder,
    /// Terminal, never changes again.
    Finished,
    PrimaryKey(PrimaryKeyPosition),
    /// No usable ordering key, the table is copied as one chunk.
    UnsupportedKey,
    /// Change-log sequence number of the last applied change.
    Log(u64),
}

impl IngestPosition {
    pub fn is_finished(&self) -> bool {
        matches!(self, IngestPosition::Finished)
    }

    /// Whether a task currently at `self` may move to `next`.
    ///
    /// `Finished` never moves, primary-key cursors only move forward within the same range
    /// and log positions never go back.
    pub fn can_advance_to(&self, next: &IngestPosition) -> bool {
        match (self, next) {
            (IngestPosition::Finished, next) => next.is_finished(),
            (IngestPosition::PrimaryKey(current), IngestPosition::PrimaryKey(next)) => {
                current.same_range(next) && current.begin_not_after(next)
            }
            (IngestPosition::Log(current), IngestPosition::Log(next)) => current <= next,
            (IngestPosition::Log(_), IngestPosition::Placeholder) => false,
            _ => true,
        }
    }
}

impl fmt::Display for IngestPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestPosition::Placeholder => f.write_str("placeholder"),
            IngestPosition::Finished => f.write_str("finished"),
            IngestPosition::UnsupportedKey => f.write_str("u,,"),
            IngestPosition::Log(lsn) => write!(f, "log,{lsn}"),
            IngestPosition::PrimaryKey(PrimaryKeyPosition::Integer { begin, end }) => write!(
                f,
                "i,{},{}",
                begin.map(|v| v.to_string()).unwrap_or_default(),
                end.map(|v| v.to_string()).unwrap_or_default()
            ),
            IngestPosition::PrimaryKey(PrimaryKeyPosition::String { begin, end }) => write!(
                f,
                "s,{},{}",
                escape_bound(begin.as_deref().unwrap_or_default()),
                escape_bound(end.as_deref().unwrap_or_default())
            ),
        }
    }
}

/// String bounds may contain the field separator, so `\\` and `,` are backslash-escaped.
fn escape_bound(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Splits escaped string bounds on unescaped commas.
fn split_escaped(raw: &str) -> Option<Vec<String>> {
    let mut fields = vec![String::new()];
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => fields.last_mut()?.push(chars.next()?),
            ',' => fields.push(String::new()),
            other => fields.last_mut()?.push(other),
        }
    }
    Some(fields)
}

impl FromStr for IngestPosition {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PositionError::Malformed(s.to_string());
        match s {
            "" | "placeholder" => return Ok(IngestPosition::Placeholder),
            "finished" => return Ok(IngestPosition::Finished),
            _ => {}
        }

        let (tag, rest) = s.split_once(',').ok_or_else(malformed)?;
        let mut parts = rest.splitn(2, ',');
        match tag {
            "log" => {
                let lsn = parts.next().ok_or_else(malformed)?;
                if parts.next().is_some() {
                    return Err(malformed());
                }
                lsn.parse::<u64>()
                    .map(IngestPosition::Log)
                    .map_err(|_| malformed())
            }
            "u" => Ok(IngestPosition::UnsupportedKey),
            "i" => {
                let begin = parts.next().ok_or_else(malformed)?;
                let end = parts.next().ok_or_else(malformed)?;
                let parse = |v: &str| -> Result<Option<i64>, PositionError> {
                    if v.is_empty() {
                        Ok(None)
                    } else {
                        v.parse::<i64>().map(Some).map_err(|_| malformed())
                    }
                };
                Ok(IngestPosition::PrimaryKey(PrimaryKeyPosition::Integer {
                    begin: parse(begin)?,
                    end: parse(end)?,
                }))
            }
            "s" => {
                let mut bounds = split_escaped(rest).ok_or_else(malformed)?.into_iter();
                let (Some(begin), Some(end), None) = (bounds.next(), bounds.next(), bounds.next())
                else {
                    return Err(malformed());
                };
                let parse = |v: String| (!v.is_empty()).then_some(v);
                Ok(IngestPosition::PrimaryKey(PrimaryKeyPosition::String {
                    begin: parse(begin),
                    end: parse(end),
                }))
            }
            _ => Err(malformed()),
        }
    }
}

impl Serialize for IngestPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IngestPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_pos(begin: Option<i64>, end: Option<i64>) -> IngestPosition {
        IngestPosition::PrimaryKey(PrimaryKeyPosition::Integer { begin, end })
    }

    #[test]
    fn parses_persisted_forms() {
        assert_eq!("i,1,100".parse(), Ok(int_pos(Some(1), Some(100))));
        assert_eq!("i,,".parse(), Ok(int_pos(None, None)));
        assert_eq!(
            "s,a,z".parse(),
            Ok(IngestPosition::PrimaryKey(PrimaryKeyPosition::String {
                begin: Some("a".into()),
                end: Some("z".into()),
            }))
        );
        assert_eq!("u,,".parse(), Ok(IngestPosition::UnsupportedKey));
        assert_eq!("finished".parse(), Ok(IngestPosition::Finished));
        assert_eq!("".parse(), Ok(IngestPosition::Placeholder));
        assert_eq!("log,42".parse(), Ok(IngestPosition::Log(42)));
        assert!("i,x,1".parse::<IngestPosition>().is_err());
        assert!("q,1,2".parse::<IngestPosition>().is_err());
    }

    #[test]
    fn display_is_parseable() {
        let pos = int_pos(Some(-5), None);
        assert_eq!(pos.to_string(), "i,-5,");
        assert_eq!(pos.to_string().parse(), Ok(pos));
    }

    #[test]
    fn string_bounds_with_separators_survive_persistence() {
        let pos = IngestPosition::PrimaryKey(PrimaryKeyPosition::String {
            begin: Some("a,b".into()),
            end: None,
        });
        assert_eq!(pos.to_string(), "s,a\\,b,");

        let json = serde_json::to_string(&pos).unwrap();
        let back: IngestPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pos);

        let tricky = IngestPosition::PrimaryKey(PrimaryKeyPosition::String {
            begin: Some("x\\,".into()),
            end: Some(",z\\".into()),
        });
        assert_eq!(tricky.to_string().parse(), Ok(tricky));
    }

    #[test]
    fn rejects_malformed_string_bounds() {
        assert!("s,a,b,c".parse::<IngestPosition>().is_err());
        assert!("s,a".parse::<IngestPosition>().is_err());
        assert!("s,a,b\\".parse::<IngestPosition>().is_err());
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&int_pos(Some(3), Some(9))).unwrap();
        assert_eq!(json, "\"i,3,9\"");
        let back: IngestPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, int_pos(Some(3), Some(9)));
    }

    #[test]
    fn finished_is_immutable() {
        let finished = IngestPosition::Finished;
        assert!(!finished.can_advance_to(&IngestPosition::Placeholder));
        assert!(!finished.can_advance_to(&int_pos(Some(1), None)));
        assert!(finished.can_advance_to(&IngestPosition::Finished));
    }

    #[test]
    fn primary_key_begin_only_advances() {
        let at_ten = int_pos(Some(10), Some(100));
        assert!(at_ten.can_advance_to(&int_pos(Some(11), Some(100))));
        assert!(at_ten.can_advance_to(&int_pos(Some(10), Some(100))));
        assert!(!at_ten.can_advance_to(&int_pos(Some(9), Some(100))));
        assert!(!at_ten.can_advance_to(&int_pos(Some(11), Some(50))));
        assert!(at_ten.can_advance_to(&IngestPosition::Finished));
        assert!(int_pos(None, Some(100)).can_advance_to(&at_ten));
    }

    #[test]
    fn rejects_mismatched_key_values() {
        let err = PrimaryKeyPosition::new(KeyType::Integer, Some(&Value::from("a")), None);
        assert!(matches!(err, Err(PositionError::KeyTypeMismatch { .. })));
    }
}
