//! Sweeping unarchived listings against their source and flagging the dead ones.

use listing_store_core::Identifier;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::{RecordStore, StoreError};

/// Decides whether the listing behind an identifier is still published at its source.
pub trait LivenessChecker {
    /// # Errors
    /// Any failure aborts the sweep.
    fn is_live(&mut self, identifier: &Identifier) -> anyhow::Result<bool>;
}

impl<F> LivenessChecker for F
where
    F: FnMut(&Identifier) -> anyhow::Result<bool>,
{
    fn is_live(&mut self, identifier: &Identifier) -> anyhow::Result<bool> {
        self(identifier)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub archived: usize,
    pub still_live: usize,
}

/// Walks the active rows of a store in creation order and archives the ones a
/// [`LivenessChecker`] reports as gone.
pub struct ArchivalManager<'a> {
    store: &'a mut RecordStore,
    fields: Vec<String>,
    limit: Option<usize>,
}

impl<'a> ArchivalManager<'a> {
    /// `fields` names the identifying columns handed to the checker.
    pub fn new<I, S>(store: &'a mut RecordStore, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { store, fields: fields.into_iter().map(Into::into).collect(), limit: None }
    }

    /// Check at most `limit` rows per sweep.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check each active row and archive the dead ones, one `UPDATE` per row.
    ///
    /// Rows archived before a failure stay archived.
    ///
    /// # Errors
    /// Returns [`StoreError::Liveness`] when the checker fails, or any store error raised
    /// while listing or archiving rows.
    #[instrument(skip(self, checker), fields(table = %self.store.table(), limit = ?self.limit))]
    pub fn sweep<C>(&mut self, checker: &mut C) -> Result<SweepSummary, StoreError>
    where
        C: LivenessChecker + ?Sized,
    {
        let fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        let mut rows = self.store.active(&fields)?;
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }

        let mut summary = SweepSummary::default();
        for row in rows {
            summary.checked += 1;
            let live = checker
                .is_live(&row.identifier)
                .map_err(|err| StoreError::Liveness(format!("row {}: {err:#}", row.id)))?;
            if live {
                summary.still_live += 1;
                continue;
            }
            debug!(id = row.id, "listing is gone");
            summary.archived += self.store.set_archived(&row.identifier)?.min(1);
        }

        info!(
            checked = summary.checked,
            archived = summary.archived,
            still_live = summary.still_live,
            "archive sweep finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use anyhow::{anyhow, Result};
    use listing_store_core::{ColumnType, Record, Value};

    use super::*;

    fn seeded(urls: &[&str]) -> Result<RecordStore> {
        let mut store = RecordStore::open_in_memory("listings")?;
        store.declare_unique(&[("url", ColumnType::Text)])?;
        for url in urls {
            store.insert(&Record::new().with("url", *url).with("rent", 900))?;
        }
        Ok(store)
    }

    fn url(identifier: &Identifier) -> String {
        match identifier.get("url") {
            Some(Value::Text(url)) => url.clone(),
            other => format!("{other:?}"),
        }
    }

    #[test]
    fn archives_only_dead_rows() -> Result<()> {
        let mut store = seeded(&["a", "b", "c"])?;
        let dead: BTreeSet<&str> = ["b"].into_iter().collect();
        let mut checker =
            |identifier: &Identifier| -> Result<bool> { Ok(!dead.contains(url(identifier).as_str())) };

        let summary = ArchivalManager::new(&mut store, ["url"]).sweep(&mut checker)?;
        assert_eq!(summary, SweepSummary { checked: 3, archived: 1, still_live: 2 });

        let remaining: Vec<String> =
            store.active(&["url"])?.iter().map(|row| url(&row.identifier)).collect();
        assert_eq!(remaining, vec!["a".to_string(), "c".to_string()]);
        Ok(())
    }

    #[test]
    fn limit_walks_rows_in_creation_order() -> Result<()> {
        let mut store = seeded(&["first", "second", "third"])?;
        let mut seen = Vec::new();
        let mut checker = |identifier: &Identifier| -> Result<bool> {
            seen.push(url(identifier));
            Ok(false)
        };

        let summary = ArchivalManager::new(&mut store, ["url"]).limit(2).sweep(&mut checker)?;
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.archived, 2);
        assert_eq!(seen, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(store.active(&["url"])?.len(), 1);
        Ok(())
    }

    #[test]
    fn checker_failure_aborts_and_keeps_earlier_archivals() -> Result<()> {
        let mut store = seeded(&["a", "b", "c"])?;
        let mut checker = |identifier: &Identifier| -> Result<bool> {
            match url(identifier).as_str() {
                "a" => Ok(false),
                _ => Err(anyhow!("source unreachable")),
            }
        };

        let err = ArchivalManager::new(&mut store, ["url"]).sweep(&mut checker).err();
        assert!(matches!(err, Some(StoreError::Liveness(message)) if message.contains("unreachable")));

        let remaining: Vec<String> =
            store.active(&["url"])?.iter().map(|row| url(&row.identifier)).collect();
        assert_eq!(remaining, vec!["b".to_string(), "c".to_string()]);
        Ok(())
    }

    #[test]
    fn sweeping_twice_is_idempotent() -> Result<()> {
        let mut store = seeded(&["a", "b"])?;
        let mut checker = |_: &Identifier| -> Result<bool> { Ok(false) };

        let first = ArchivalManager::new(&mut store, ["url"]).sweep(&mut checker)?;
        let second = ArchivalManager::new(&mut store, ["url"]).sweep(&mut checker)?;
        assert_eq!(first.archived, 2);
        assert_eq!(second, SweepSummary::default());
        assert_eq!(store.count(None)?, 2);
        Ok(())
    }
}
