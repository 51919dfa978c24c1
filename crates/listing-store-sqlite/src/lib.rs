use std::collections::BTreeMap;
use std::path::Path;

use listing_store_core::{
    quote_identifier, unique_where, validate_field_name, validate_table_name, ColumnType,
    Identifier, Record, Value,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Transaction};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

pub mod archive;
mod bind;
mod error;
mod schema;

pub use archive::{ArchivalManager, LivenessChecker, SweepSummary};
pub use error::{
    is_duplicate_column, is_undefined_column, is_unique_violation, undefined_column_name,
    StoreError,
};
pub use schema::Column;

use schema::rollback_quietly;

const ARCHIVED_COLUMN: &str = "archived";

/// A listing table whose column set grows with the records written into it.
///
/// The store owns its connection. Every public operation runs in its own transaction
/// and rolls it back on every failure path.
pub struct RecordStore {
    conn: Connection,
    table: String,
    // Lowercased column name -> declared type (None when the type is not one of ours).
    columns: BTreeMap<String, Option<ColumnType>>,
}

/// An unarchived row: its surrogate id plus the requested identifying fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRow {
    pub id: i64,
    pub identifier: Identifier,
}

struct InsertStatement {
    sql: String,
    values: Vec<SqlValue>,
}

impl RecordStore {
    /// Open a SQLite-backed listing table, creating it when missing.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened, the table name is invalid,
    /// or the table cannot be created.
    pub fn open(path: &Path, table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|source| StoreError::Open { path: path.to_path_buf(), source })?;
        Self::from_connection(conn, table)
    }

    /// # Errors
    /// Returns an error when the table name is invalid or the table cannot be created.
    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, table)
    }

    /// Wrap an existing connection and make sure the table exists.
    ///
    /// # Errors
    /// Returns an error when the table name is invalid, pragmas cannot be applied or the
    /// table cannot be created.
    pub fn from_connection(conn: Connection, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let mut store = Self { conn, table: table.to_string(), columns: BTreeMap::new() };
        store.init_table()?;
        Ok(store)
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table with its implicit `id` and `archived` columns. Idempotent; a
    /// table created elsewhere without `archived` gets the column added.
    ///
    /// # Errors
    /// Returns an error when the DDL fails.
    pub fn init_table(&mut self) -> Result<(), StoreError> {
        let table = quote_identifier(&self.table);
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               archived BOOLEAN NOT NULL DEFAULT 0
             );"
        ))?;
        tx.commit()?;
        self.refresh_columns()?;

        if !self.columns.contains_key(ARCHIVED_COLUMN) {
            info!(table = %self.table, "adding archived column to existing table");
            let tx = self.conn.transaction()?;
            tx.execute_batch(&format!(
                "ALTER TABLE {table} ADD COLUMN archived BOOLEAN NOT NULL DEFAULT 0"
            ))?;
            tx.commit()?;
            self.refresh_columns()?;
        }

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {table}(archived, id)",
            quote_identifier(&format!("ix_{}_archived", self.table))
        ))?;
        tx.commit()?;
        Ok(())
    }

    /// Declare the business key: add any missing identifying columns, then put a unique
    /// index over them. Inserts that collide with the index are reported as duplicates.
    ///
    /// # Errors
    /// Returns an error for an empty or invalid column list, or when the index cannot be
    /// created (for example, existing rows already collide).
    pub fn declare_unique(&mut self, columns: &[(&str, ColumnType)]) -> Result<(), StoreError> {
        if columns.is_empty() {
            return Err(listing_store_core::RecordError::EmptyIdentifier.into());
        }
        for (name, _) in columns {
            validate_field_name(name)?;
        }

        let missing = self.identify_missing(columns.iter().map(|(name, _)| *name))?;
        let to_add: BTreeMap<String, ColumnType> = columns
            .iter()
            .filter(|(name, _)| missing.iter().any(|m| m == name))
            .map(|(name, column_type)| ((*name).to_string(), *column_type))
            .collect();
        self.add_columns(&to_add)?;

        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        let index = quote_identifier(&format!("ux_{}_{}", self.table, names.join("_")));
        let quoted: Vec<String> = names.iter().map(|name| quote_identifier(name)).collect();
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {}({})",
            quote_identifier(&self.table),
            quoted.join(", ")
        );
        scoped(&mut self.conn, |tx| tx.execute_batch(&sql))?;
        info!(table = %self.table, columns = ?names, "declared unique identifier");
        Ok(())
    }

    /// Persist `record`, growing the schema when it carries unseen fields.
    ///
    /// Returns `true` when the row was committed and `false` when it was rejected as a
    /// duplicate of an existing row. A missing column triggers one round of schema
    /// repair followed by exactly one retry; any fault on that retry is returned.
    ///
    /// # Errors
    /// Returns an error for invalid field names, when schema repair fails, when the retry
    /// fails (including a uniqueness violation or a still undefined column), or for any
    /// other database fault.
    #[instrument(skip(self, record), fields(table = %self.table, fields = record.len()))]
    pub fn insert(&mut self, record: &Record) -> Result<bool, StoreError> {
        record.validate()?;
        if !self.knows_all(record.field_names()) {
            // Another writer may have added the column; its declared type decides binding.
            self.refresh_columns()?;
        }
        let statement = self.insert_statement(record)?;

        let result =
            scoped(&mut self.conn, |tx| tx.execute(&statement.sql, params_from_iter(&statement.values)));
        match result {
            Ok(_) => {
                debug!("record committed");
                Ok(true)
            }
            Err(err) if error::is_unique_violation(&err) => {
                debug!("record rejected as duplicate");
                Ok(false)
            }
            Err(err) if error::is_undefined_column(&err) => {
                debug!(error = %err, "undefined column; repairing schema");
                self.repair_schema(record)?;
                self.retry_insert(record)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Decode `value` (a JSON object) into a record and insert it. Nothing reaches the
    /// database when any field has an unsupported kind.
    ///
    /// # Errors
    /// Returns [`StoreError::Record`] for non-object input or unsupported field kinds, and
    /// everything [`RecordStore::insert`] returns.
    pub fn insert_json(&mut self, value: &serde_json::Value) -> Result<bool, StoreError> {
        let record = Record::from_json(value)?;
        self.insert(&record)
    }

    /// Whether a row matches `identifier`. A predicate naming a column that does not
    /// exist yet matches nothing.
    ///
    /// # Errors
    /// Returns an error for an empty or invalid identifier, or for database faults other
    /// than an undefined column.
    pub fn exists(&mut self, identifier: &Identifier) -> Result<bool, StoreError> {
        let predicate = unique_where(identifier)?;
        let params = bind::to_sql_all(predicate.params())?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
            quote_identifier(&self.table),
            predicate.clause()
        );

        match scoped(&mut self.conn, |tx| {
            tx.query_row(&sql, params_from_iter(&params), |row| row.get::<_, i64>(0))
        }) {
            Ok(found) => Ok(found == 1),
            Err(err) if error::is_undefined_column(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Surrogate `id` of the single row matching `identifier`.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when nothing matches (including when an
    /// identifying column does not exist yet) and [`StoreError::Ambiguous`] when more
    /// than one row matches.
    pub fn get_surrogate_id(&mut self, identifier: &Identifier) -> Result<i64, StoreError> {
        let predicate = unique_where(identifier)?;
        let params = bind::to_sql_all(predicate.params())?;
        let sql = format!(
            "SELECT COUNT(*), MIN(id) FROM {} WHERE {}",
            quote_identifier(&self.table),
            predicate.clause()
        );

        let (matches, id) = match scoped(&mut self.conn, |tx| {
            tx.query_row(&sql, params_from_iter(&params), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?))
            })
        }) {
            Ok(found) => found,
            Err(err) if error::is_undefined_column(&err) => return Err(StoreError::NotFound),
            Err(err) => return Err(err.into()),
        };

        match (matches, id) {
            (1, Some(id)) => Ok(id),
            (0, _) | (_, None) => Err(StoreError::NotFound),
            (matches, _) => Err(StoreError::Ambiguous { matches: matches.unsigned_abs() }),
        }
    }

    /// Number of rows, optionally restricted to those matching `identifier`.
    ///
    /// # Errors
    /// Returns an error for an invalid identifier or a database fault.
    pub fn count(&mut self, identifier: Option<&Identifier>) -> Result<u64, StoreError> {
        let table = quote_identifier(&self.table);
        let (sql, params) = match identifier {
            Some(identifier) => {
                let predicate = unique_where(identifier)?;
                (
                    format!("SELECT COUNT(*) FROM {table} WHERE {}", predicate.clause()),
                    bind::to_sql_all(predicate.params())?,
                )
            }
            None => (format!("SELECT COUNT(*) FROM {table}"), Vec::new()),
        };

        match scoped(&mut self.conn, |tx| {
            tx.query_row(&sql, params_from_iter(&params), |row| row.get::<_, i64>(0))
        }) {
            Ok(count) => Ok(count.unsigned_abs()),
            Err(err) if error::is_undefined_column(&err) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Unarchived rows in creation order, each with the requested identifying fields.
    ///
    /// # Errors
    /// Returns [`StoreError::UndefinedColumn`] when one of `fields` has no column, or an
    /// error for invalid names and database faults.
    pub fn active(&mut self, fields: &[&str]) -> Result<Vec<ActiveRow>, StoreError> {
        if fields.is_empty() {
            return Err(listing_store_core::RecordError::EmptyIdentifier.into());
        }
        let mut selected = Vec::with_capacity(fields.len());
        for field in fields {
            validate_field_name(field)?;
            selected.push(quote_identifier(field));
        }
        let sql = format!(
            "SELECT id, {} FROM {} WHERE {ARCHIVED_COLUMN} = 0 ORDER BY id ASC",
            selected.join(", "),
            quote_identifier(&self.table)
        );
        if !self.knows_all(fields.iter().copied()) {
            self.refresh_columns()?;
        }
        let column_types: Vec<Option<ColumnType>> =
            fields.iter().map(|field| self.column_type(field)).collect();

        let result = scoped(&mut self.conn, |tx| {
            let mut stmt = tx.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut active = Vec::new();
            while let Some(row) = rows.next()? {
                let mut identifier = Identifier::new();
                for (index, field) in fields.iter().enumerate() {
                    let value = bind::from_sql(row.get_ref(index + 1)?, column_types[index]);
                    identifier.insert(*field, value);
                }
                active.push(ActiveRow { id: row.get(0)?, identifier });
            }
            Ok(active)
        });

        match result {
            Ok(active) => Ok(active),
            Err(err) if error::is_undefined_column(&err) => Err(StoreError::UndefinedColumn {
                column: error::undefined_column_name(&err).unwrap_or_default(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Flag every row matching `identifier` as archived with one `UPDATE`. Returns the
    /// number of rows changed; rows already archived are not counted.
    ///
    /// # Errors
    /// Returns [`StoreError::UndefinedColumn`] when the identifier names a missing column,
    /// or an error for invalid identifiers and database faults.
    pub fn set_archived(&mut self, identifier: &Identifier) -> Result<usize, StoreError> {
        let predicate = unique_where(identifier)?;
        let params = bind::to_sql_all(predicate.params())?;
        let sql = format!(
            "UPDATE {} SET {ARCHIVED_COLUMN} = 1 WHERE {ARCHIVED_COLUMN} = 0 AND {}",
            quote_identifier(&self.table),
            predicate.clause()
        );

        match scoped(&mut self.conn, |tx| tx.execute(&sql, params_from_iter(&params))) {
            Ok(changed) => {
                if changed > 0 {
                    let predicate = predicate.literal()?;
                    info!(table = %self.table, %predicate, changed, "archived listing");
                }
                Ok(changed)
            }
            Err(err) if error::is_undefined_column(&err) => Err(StoreError::UndefinedColumn {
                column: error::undefined_column_name(&err).unwrap_or_default(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn retry_insert(&mut self, record: &Record) -> Result<bool, StoreError> {
        let statement = self.insert_statement(record)?;
        let result =
            scoped(&mut self.conn, |tx| tx.execute(&statement.sql, params_from_iter(&statement.values)));
        match result {
            Ok(_) => {
                debug!("record committed after schema repair");
                Ok(true)
            }
            // Past the retry every fault is final, a duplicate included.
            Err(err) if error::is_undefined_column(&err) => Err(StoreError::UndefinedColumn {
                column: error::undefined_column_name(&err).unwrap_or_default(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn repair_schema(&mut self, record: &Record) -> Result<(), StoreError> {
        let missing = self.identify_missing(record.field_names())?;
        let columns: BTreeMap<String, ColumnType> = missing
            .into_iter()
            .filter_map(|name| {
                let column_type = record.get(&name).map(Value::column_type)?;
                Some((name, column_type))
            })
            .collect();
        self.add_columns(&columns)?;
        self.refresh_columns()
    }

    fn insert_statement(&self, record: &Record) -> Result<InsertStatement, StoreError> {
        let table = quote_identifier(&self.table);
        if record.is_empty() {
            return Ok(InsertStatement {
                sql: format!("INSERT INTO {table} DEFAULT VALUES"),
                values: Vec::new(),
            });
        }

        let mut names = Vec::with_capacity(record.len());
        let mut placeholders = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (name, value) in record {
            names.push(quote_identifier(name));
            placeholders.push(format!("?{}", values.len() + 1));
            values.push(self.bind_for_column(name, value)?);
        }

        Ok(InsertStatement {
            sql: format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                names.join(", "),
                placeholders.join(", ")
            ),
            values,
        })
    }

    // A value whose kind does not match an existing column is written as NULL.
    fn bind_for_column(&self, name: &str, value: &Value) -> Result<SqlValue, StoreError> {
        if let Some(column_type) = self.column_type(name) {
            if !value.fits(column_type) {
                warn!(
                    table = %self.table,
                    column = %name,
                    column_type = %column_type,
                    kind = %value.kind(),
                    "value does not match column type; storing NULL"
                );
                return Ok(SqlValue::Null);
            }
        }
        Ok(bind::to_sql(value)?)
    }

    fn knows_all<'a>(&self, mut names: impl Iterator<Item = &'a str>) -> bool {
        names.all(|name| self.columns.contains_key(&name.to_ascii_lowercase()))
    }

    fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(&name.to_ascii_lowercase()).copied().flatten()
    }
}

/// Run `f` inside a fresh transaction: commit on success, roll back on failure.
fn scoped<T, F>(conn: &mut Connection, f: F) -> rusqlite::Result<T>
where
    F: FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
{
    let tx = conn.transaction()?;
    match f(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            rollback_quietly(tx);
            Err(err)
        }
    }
}
