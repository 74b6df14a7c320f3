use crate::models::truncate_millis;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A strongly-typed reference entity stored as versioned records of one `KIND`.
pub trait RefData: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;

    /// Natural key rendered as a string; composite keys use `composite_key`.
    fn natural_key(&self) -> String;

    fn to_record(&self) -> Result<VersionedRecord> {
        let payload = serde_json::to_value(self).map_err(|e| Error::backend("encode payload", e))?;
        Ok(VersionedRecord::draft(Self::KIND, self.natural_key(), payload))
    }
}

/// Joins composite key parts with `/`.
pub fn composite_key(parts: &[&dyn Display]) -> String {
    parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// One version of one reference entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub kind: String,
    pub key: String,
    pub payload: serde_json::Value,
    /// `None` until the record is set up or evolved into.
    pub valid_from: Option<DateTime<Utc>>,
    /// `None` means open: this is the live version.
    pub valid_to: Option<DateTime<Utc>>,
}

impl VersionedRecord {
    pub fn draft(
        kind: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
            payload,
            valid_from: None,
            valid_to: None,
        }
    }

    pub fn decode<T: RefData>(&self) -> Result<T> {
        if self.kind != T::KIND {
            return Err(Error::InvalidInput(format!(
                "record kind {} is not {}",
                self.kind,
                T::KIND
            )));
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::backend(format!("decode {} {}", self.kind, self.key), e))
    }

    pub fn same_key(&self, other: &Self) -> bool {
        self.kind == other.kind && self.key == other.key
    }

    /// Same natural key and equal payloads; validity is ignored.
    pub fn equivalent(&self, other: &Self) -> bool {
        self.same_key(other) && self.payload == other.payload
    }

    pub fn is_live(&self) -> bool {
        self.valid_from.is_some() && self.valid_to.is_none()
    }

    /// `valid_from <= at < valid_to`.
    pub fn is_live_at(&self, at: DateTime<Utc>) -> bool {
        match self.valid_from {
            Some(from) => from <= at && self.valid_to.is_none_or(|to| at < to),
            None => false,
        }
    }

    /// Opens a record with no predecessor.
    pub fn setup(&mut self, at: DateTime<Utc>) {
        self.valid_from = Some(truncate_millis(at));
        self.valid_to = None;
    }

    /// Closes `old` at `at` and opens `new` at the same instant.
    pub fn evolve(old: &mut Self, new: &mut Self, at: DateTime<Utc>) -> Result<()> {
        if !old.same_key(new) {
            return Err(Error::InvalidInput(format!(
                "cannot evolve {}/{} into {}/{}",
                old.kind, old.key, new.kind, new.key
            )));
        }
        old.end_of_life(at)?;
        new.setup(at);
        Ok(())
    }

    /// Closes the live version with no successor.
    pub fn end_of_life(&mut self, at: DateTime<Utc>) -> Result<()> {
        let at = truncate_millis(at);
        let Some(from) = self.valid_from else {
            return Err(Error::InvalidInput(format!(
                "{}/{} was never set up",
                self.kind, self.key
            )));
        };
        if self.valid_to.is_some() {
            return Err(Error::Conflict(format!(
                "{}/{} is already closed",
                self.kind, self.key
            )));
        }
        if at <= from {
            return Err(Error::InvalidInput(format!(
                "{}/{} cannot close at or before its start",
                self.kind, self.key
            )));
        }
        self.valid_to = Some(at);
        Ok(())
    }
}

/// A mutation proposed by an adapter for one run.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// Fresh upstream state; inserted, evolved or skipped against the live version.
    Upsert(VersionedRecord),
    /// A live version already closed by `end_of_life`, written without lookup.
    Retire(VersionedRecord),
}

impl Candidate {
    pub fn upsert<T: RefData>(value: &T) -> Result<Self> {
        Ok(Self::Upsert(value.to_record()?))
    }

    /// Closes a stored live version at `at`.
    pub fn retire(mut live: VersionedRecord, at: DateTime<Utc>) -> Result<Self> {
        live.end_of_life(at)?;
        Ok(Self::Retire(live))
    }

    pub fn record(&self) -> &VersionedRecord {
        match self {
            Self::Upsert(r) | Self::Retire(r) => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::from_millis;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: i64,
        v: i64,
    }

    impl RefData for Widget {
        const KIND: &'static str = "widget";
        fn natural_key(&self) -> String {
            self.id.to_string()
        }
    }

    #[test]
    fn evolve_closes_old_and_opens_new_at_the_same_instant() {
        let mut old = Widget { id: 5, v: 1 }.to_record().unwrap();
        old.setup(from_millis(100));
        let mut new = Widget { id: 5, v: 2 }.to_record().unwrap();

        VersionedRecord::evolve(&mut old, &mut new, from_millis(200)).unwrap();

        assert_eq!(old.valid_to, Some(from_millis(200)));
        assert_eq!(new.valid_from, Some(from_millis(200)));
        assert!(new.valid_to.is_none());
        assert!(old.is_live_at(from_millis(199)));
        assert!(!old.is_live_at(from_millis(200)));
        assert!(new.is_live_at(from_millis(200)));
    }

    #[test]
    fn evolve_rejects_different_keys() {
        let mut old = Widget { id: 1, v: 1 }.to_record().unwrap();
        old.setup(from_millis(100));
        let mut new = Widget { id: 2, v: 1 }.to_record().unwrap();
        assert!(VersionedRecord::evolve(&mut old, &mut new, from_millis(200)).is_err());
        assert!(old.is_live());
    }

    #[test]
    fn equivalence_ignores_validity() {
        let mut a = VersionedRecord::draft("widget", "1", json!({"v": 1}));
        let b = VersionedRecord::draft("widget", "1", json!({"v": 1}));
        a.setup(from_millis(10));
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&VersionedRecord::draft("widget", "1", json!({"v": 2}))));
    }

    #[test]
    fn end_of_life_twice_is_a_conflict() {
        let mut r = VersionedRecord::draft("widget", "1", json!({}));
        assert!(r.end_of_life(from_millis(5)).is_err());
        r.setup(from_millis(5));
        r.end_of_life(from_millis(6)).unwrap();
        assert!(matches!(r.end_of_life(from_millis(7)), Err(Error::Conflict(_))));
    }

    #[test]
    fn decode_checks_kind() {
        let r = VersionedRecord::draft("gadget", "1", json!({"id": 1, "v": 1}));
        assert!(r.decode::<Widget>().is_err());
        let r = Widget { id: 1, v: 3 }.to_record().unwrap();
        assert_eq!(r.decode::<Widget>().unwrap().v, 3);
    }

    #[test]
    fn composite_keys_are_slash_joined() {
        assert_eq!(composite_key(&[&99, &1234]), "99/1234");
    }
}
