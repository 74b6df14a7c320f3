use crate::store::traits::VersionedStore;
use crate::versioned::models::{RefData, VersionedRecord};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Which records a cursor scan visits: one kind, live at `as_of`, optionally under a key prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanQuery {
    pub kind: String,
    pub as_of: DateTime<Utc>,
    pub key_prefix: Option<String>,
}

impl ScanQuery {
    pub fn live(kind: impl Into<String>, as_of: DateTime<Utc>) -> Self {
        Self {
            kind: kind.into(),
            as_of,
            key_prefix: None,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn matches(&self, record: &VersionedRecord) -> bool {
        record.kind == self.kind
            && record.is_live_at(self.as_of)
            && self
                .key_prefix
                .as_deref()
                .is_none_or(|p| record.key.starts_with(p))
    }
}

/// Keyset pagination over live records in ascending key order.
///
/// The cursor is the last key of the previous page; the scan ends at the first empty page.
pub struct LivePager<'a> {
    store: &'a dyn VersionedStore,
    query: ScanQuery,
    page_size: usize,
    cursor: Option<String>,
    done: bool,
}

impl<'a> LivePager<'a> {
    pub fn new(store: &'a dyn VersionedStore, query: ScanQuery, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::InvalidInput("page_size must be > 0".to_string()));
        }
        Ok(Self {
            store,
            query,
            page_size,
            cursor: None,
            done: false,
        })
    }

    /// Next non-empty page, or `None` once exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<VersionedRecord>>> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .store
            .page(&self.query, self.cursor.as_deref(), self.page_size)
            .await?;
        match page.last() {
            None => {
                self.done = true;
                Ok(None)
            }
            Some(last) => {
                self.cursor = Some(last.key.clone());
                Ok(Some(page))
            }
        }
    }
}

#[tracing::instrument(level = "debug", skip(store), fields(kind = %query.kind))]
pub async fn scan_all(
    store: &dyn VersionedStore,
    query: ScanQuery,
    page_size: usize,
) -> Result<Vec<VersionedRecord>> {
    let mut pager = LivePager::new(store, query, page_size)?;
    let mut out = Vec::new();
    while let Some(page) = pager.next_page().await? {
        out.extend(page);
    }
    Ok(out)
}

/// `scan_all` over `T::KIND`, returning stored versions alongside their decoded payloads.
pub async fn scan_all_typed<T: RefData>(
    store: &dyn VersionedStore,
    as_of: DateTime<Utc>,
    key_prefix: Option<&str>,
    page_size: usize,
) -> Result<Vec<(VersionedRecord, T)>> {
    let mut query = ScanQuery::live(T::KIND, as_of);
    if let Some(p) = key_prefix {
        query = query.with_key_prefix(p);
    }
    scan_all(store, query, page_size)
        .await?
        .into_iter()
        .map(|r| {
            let value = r.decode::<T>()?;
            Ok((r, value))
        })
        .collect()
}
