use std::collections::BTreeMap;

use listing_store_core::{quote_identifier, validate_field_name, ColumnType};
use rusqlite::{Connection, Transaction};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{is_duplicate_column, is_undefined_column};
use crate::{RecordStore, StoreError};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub declared_type: String,
    pub column_type: Option<ColumnType>,
}

impl RecordStore {
    /// Return the names in `fields` that have no backing column, in input order.
    ///
    /// Each name is probed with a trivial read inside its own transaction, which is
    /// rolled back before the next probe runs.
    ///
    /// # Errors
    /// Returns an error for invalid names or when a probe fails for any reason other
    /// than a missing column (for example, the table itself is missing).
    pub fn identify_missing<'a, I>(&mut self, fields: I) -> Result<Vec<String>, StoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut missing = Vec::new();
        for field in fields {
            validate_field_name(field)?;
            let tx = self.conn.transaction()?;
            let probe = probe_column(&tx, &self.table, field);
            tx.rollback()?;
            match probe {
                Ok(()) => {}
                Err(err) if is_undefined_column(&err) => missing.push(field.to_string()),
                Err(err) => return Err(err.into()),
            }
        }
        debug!(table = %self.table, missing = ?missing, "schema probe finished");
        Ok(missing)
    }

    /// Add one column per entry, committing after each `ALTER TABLE`.
    ///
    /// A column that already exists is skipped. When an addition fails, the columns
    /// added before it stay committed and the error is returned.
    ///
    /// # Errors
    /// Returns an error for invalid names or when an `ALTER TABLE` statement fails.
    pub fn add_columns(
        &mut self,
        columns: &BTreeMap<String, ColumnType>,
    ) -> Result<Vec<String>, StoreError> {
        let mut added = Vec::new();
        for (name, column_type) in columns {
            validate_field_name(name)?;
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_identifier(&self.table),
                quote_identifier(name),
                column_type.as_sql()
            );

            let tx = self.conn.transaction()?;
            match tx.execute_batch(&sql) {
                Ok(()) => {
                    tx.commit()?;
                    info!(table = %self.table, column = %name, column_type = %column_type, "added column");
                    self.columns.insert(name.to_ascii_lowercase(), Some(*column_type));
                    added.push(name.clone());
                }
                Err(err) if is_duplicate_column(&err) => {
                    rollback_quietly(tx);
                    debug!(table = %self.table, column = %name, "column already exists");
                }
                Err(err) => {
                    rollback_quietly(tx);
                    return Err(err.into());
                }
            }
        }
        Ok(added)
    }

    /// Columns of the target table as reported by `PRAGMA table_info`.
    ///
    /// # Errors
    /// Returns an error when the pragma cannot be read.
    pub fn columns(&self) -> Result<Vec<Column>, StoreError> {
        Ok(table_columns(&self.conn, &self.table)?)
    }

    pub(crate) fn refresh_columns(&mut self) -> Result<(), StoreError> {
        self.columns = table_columns(&self.conn, &self.table)?
            .into_iter()
            .map(|column| (column.name.to_ascii_lowercase(), column.column_type))
            .collect();
        Ok(())
    }
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<Column>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map([table], |row| {
        let name: String = row.get(0)?;
        let declared_type: String = row.get(1)?;
        Ok((name, declared_type))
    })?;

    let mut columns = Vec::new();
    for row in rows {
        let (name, declared_type) = row?;
        let column_type = ColumnType::parse(&declared_type);
        columns.push(Column { name, declared_type, column_type });
    }
    Ok(columns)
}

fn probe_column(tx: &Transaction<'_>, table: &str, column: &str) -> rusqlite::Result<()> {
    let sql = format!(
        "SELECT {} FROM {} LIMIT 0",
        quote_identifier(column),
        quote_identifier(table)
    );
    let mut stmt = tx.prepare(&sql)?;
    stmt.exists([])?;
    Ok(())
}

pub(crate) fn rollback_quietly(tx: Transaction<'_>) {
    if let Err(err) = tx.rollback() {
        warn!(error = %err, "rollback failed");
    }
}
