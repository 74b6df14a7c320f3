use crate::Result;
use crate::store::traits::StoreTxn;
use crate::versioned::models::{Candidate, VersionedRecord};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommitAction {
    Inserted,
    Evolved,
    Unchanged,
    Retired,
}

/// Default commit path for one candidate inside an open transaction.
///
/// Retirements are written as-is. Upserts are compared to the live version for the same key:
/// missing means insert, equivalent means skip, anything else evolves.
#[tracing::instrument(level = "debug", skip(txn, candidate), fields(kind = %candidate.record().kind, key = %candidate.record().key))]
pub async fn evolve_or_add(
    txn: &mut dyn StoreTxn,
    at: DateTime<Utc>,
    candidate: Candidate,
) -> Result<CommitAction> {
    match candidate {
        Candidate::Retire(closed) => {
            txn.put(&closed).await?;
            Ok(CommitAction::Retired)
        }
        Candidate::Upsert(mut fresh) => {
            match txn.get_live(&fresh.kind, &fresh.key).await? {
                None => {
                    fresh.setup(at);
                    txn.put(&fresh).await?;
                    Ok(CommitAction::Inserted)
                }
                Some(live) if live.equivalent(&fresh) => Ok(CommitAction::Unchanged),
                Some(mut live) => {
                    VersionedRecord::evolve(&mut live, &mut fresh, at)?;
                    txn.put(&live).await?;
                    txn.put(&fresh).await?;
                    Ok(CommitAction::Evolved)
                }
            }
        }
    }
}

/// Retirement candidates for stored live records whose keys were not reported this run.
pub fn retire_missing<'a>(
    stored: impl IntoIterator<Item = VersionedRecord>,
    reported_keys: impl IntoIterator<Item = &'a str>,
    at: DateTime<Utc>,
) -> Result<Vec<Candidate>> {
    let reported: HashSet<&str> = reported_keys.into_iter().collect();
    stored
        .into_iter()
        .filter(|r| !reported.contains(r.key.as_str()))
        .map(|r| Candidate::retire(r, at))
        .collect()
}
