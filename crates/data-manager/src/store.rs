//! Column store access
//!
//! The explorer keeps one table per imported file inside an embedded SQLite
//! database. Reads are bulk columnar: one SELECT of exactly the requested
//! columns, converted column by column into `f64` vectors. Every call opens its
//! own connection and releases it when the call returns, on success and on
//! error alike.

use std::path::{Path, PathBuf};
use std::time::Duration;

use geoexplorer_shared::{map_explorer_error, ColumnMapping, ColumnType, ExplorerError, ExplorerResult};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::{debug, trace};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata tables living next to the imported data
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS datasets (
        id TEXT PRIMARY KEY,
        table_name TEXT NOT NULL,
        total_rows INTEGER NOT NULL,
        column_mappings TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS column_stats (
        dataset_id TEXT NOT NULL,
        column_name TEXT NOT NULL,
        column_type TEXT NOT NULL,
        count INTEGER,
        mean REAL,
        std REAL,
        min_value REAL,
        q25 REAL,
        q50 REAL,
        q75 REAL,
        max_value REAL,
        null_count INTEGER,
        unique_count INTEGER,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (dataset_id, column_name)
    );
";

/// Quote a user-controlled column name for use as an SQL identifier.
///
/// Names come from CSV headers, so anything printable is allowed; control
/// characters (NUL included) are rejected and embedded quotes are doubled.
pub fn quote_identifier(name: &str) -> ExplorerResult<String> {
    if name.is_empty() || name.chars().any(char::is_control) {
        return Err(ExplorerError::InvalidIdentifier {
            identifier: name.escape_debug().to_string(),
        });
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Table names are generated, never user input, and must stay plain.
pub fn validate_table_name(table: &str) -> ExplorerResult<&str> {
    let mut chars = table.chars();
    let valid_head = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(table)
    } else {
        Err(ExplorerError::InvalidIdentifier {
            identifier: table.escape_debug().to_string(),
        })
    }
}

/// One fetched column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnData {
    pub name: String,
    /// Values with NULL and unparseable entries mapped to NaN
    pub values: Vec<f64>,
    /// False when any non-NULL value was stored as text or blob
    pub numeric: bool,
}

/// Column-oriented query result, columns in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnBatch {
    pub columns: Vec<ColumnData>,
}

impl ColumnBatch {
    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A single cell handed to [`SqliteStore::import_table`]
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Null,
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<CellValue> for Value {
    fn from(cell: CellValue) -> Self {
        match cell {
            CellValue::Number(v) if v.is_nan() => Value::Null,
            CellValue::Number(v) => Value::Real(v),
            CellValue::Text(s) => Value::Text(s),
            CellValue::Null => Value::Null,
        }
    }
}

/// Read access to the analytical store
pub trait ColumnStore: Send + Sync {
    fn table_exists(&self, table: &str) -> ExplorerResult<bool>;

    /// Fetch exactly `columns`, in order, for every row of `table`.
    fn fetch_columns(&self, table: &str, columns: &[String]) -> ExplorerResult<ColumnBatch>;

    /// Fetch one page of rows in storage order.
    fn fetch_page(
        &self,
        table: &str,
        columns: &[String],
        limit: u32,
        offset: u64,
    ) -> ExplorerResult<ColumnBatch>;
}

/// SQLite-backed store. Holds only the database path.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database and its metadata tables.
    pub fn open(path: impl AsRef<Path>) -> ExplorerResult<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };

        let conn = store.writer()?;
        map_explorer_error!(
            conn.pragma_update(None, "journal_mode", "WAL"),
            Store,
            "enabling WAL"
        )?;
        map_explorer_error!(conn.execute_batch(SCHEMA), Store, "creating metadata tables")?;

        debug!(path = %store.path.display(), "Opened column store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh connection with `query_only` set, released when dropped.
    pub(crate) fn reader(&self) -> ExplorerResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = map_explorer_error!(
            Connection::open_with_flags(&self.path, flags),
            Store,
            format!("opening {}", self.path.display())
        )?;
        map_explorer_error!(conn.busy_timeout(BUSY_TIMEOUT), Store, "setting busy timeout")?;
        map_explorer_error!(
            conn.pragma_update(None, "query_only", true),
            Store,
            "setting query_only"
        )?;
        Ok(conn)
    }

    /// Fresh read-write connection, released when dropped.
    pub(crate) fn writer(&self) -> ExplorerResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = map_explorer_error!(
            Connection::open_with_flags(&self.path, flags),
            Store,
            format!("opening {}", self.path.display())
        )?;
        map_explorer_error!(conn.busy_timeout(BUSY_TIMEOUT), Store, "setting busy timeout")?;
        Ok(conn)
    }

    /// Create or replace `table` from typed column specs and rows of cells.
    ///
    /// This is the ingestion boundary; parsing CSV text into cells happens
    /// upstream. Returns the number of rows written.
    pub fn import_table(
        &self,
        table: &str,
        columns: &[ColumnMapping],
        rows: &[Vec<CellValue>],
    ) -> ExplorerResult<u64> {
        let table = quote_identifier(validate_table_name(table)?)?;
        if columns.is_empty() {
            return Err(ExplorerError::InvalidRequest {
                message: "cannot import a table without columns".to_string(),
            });
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(ExplorerError::InvalidRequest {
                message: format!(
                    "row {bad} has {} cells, expected {}",
                    rows[bad].len(),
                    columns.len()
                ),
            });
        }

        let mut definitions = Vec::with_capacity(columns.len());
        for mapping in columns {
            let sql_type = match mapping.column_type {
                ColumnType::Numeric => "REAL",
                ColumnType::Categorical => "TEXT",
            };
            definitions.push(format!("{} {sql_type}", quote_identifier(&mapping.column_name)?));
        }
        let placeholders = vec!["?"; columns.len()].join(", ");

        let mut conn = self.writer()?;
        let tx = map_explorer_error!(conn.transaction(), Store, "starting import")?;
        map_explorer_error!(
            tx.execute_batch(&format!(
                "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({});",
                definitions.join(", ")
            )),
            Store,
            "creating table"
        )?;
        {
            let mut insert = map_explorer_error!(
                tx.prepare(&format!("INSERT INTO {table} VALUES ({placeholders})")),
                Store,
                "preparing insert"
            )?;
            for row in rows {
                let values = row.iter().cloned().map(Value::from);
                map_explorer_error!(
                    insert.execute(params_from_iter(values)),
                    Store,
                    "inserting row"
                )?;
            }
        }
        map_explorer_error!(tx.commit(), Store, "committing import")?;

        debug!(table = %table, rows = rows.len(), "Imported table");
        Ok(rows.len() as u64)
    }

    /// Drop a data table if it exists.
    pub fn drop_table(&self, table: &str) -> ExplorerResult<()> {
        let table = quote_identifier(validate_table_name(table)?)?;
        let conn = self.writer()?;
        map_explorer_error!(
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {table}")),
            Store,
            "dropping table"
        )
    }

    fn table_columns(conn: &Connection, table: &str) -> ExplorerResult<Vec<String>> {
        let mut stmt = map_explorer_error!(
            conn.prepare("SELECT name FROM pragma_table_info(?1)"),
            Store,
            "reading table info"
        )?;
        let names = map_explorer_error!(
            stmt.query_map([table], |row| row.get::<_, String>(0)),
            Store,
            "reading table info"
        )?;
        map_explorer_error!(
            names.collect::<Result<Vec<_>, _>>(),
            Store,
            "reading table info"
        )
    }

    fn select(
        &self,
        table: &str,
        columns: &[String],
        page: Option<(u32, u64)>,
    ) -> ExplorerResult<ColumnBatch> {
        let table = validate_table_name(table)?;
        if columns.is_empty() {
            return Ok(ColumnBatch::default());
        }

        let quoted = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<ExplorerResult<Vec<_>>>()?;

        let conn = self.reader()?;

        let existing = Self::table_columns(&conn, table)?;
        if existing.is_empty() {
            return Err(ExplorerError::TableNotFound {
                table: table.to_string(),
            });
        }
        if let Some(missing) = columns.iter().find(|c| !existing.contains(c)) {
            return Err(ExplorerError::Store {
                message: format!("column {missing:?} not found in {table}"),
            });
        }

        let mut sql = format!("SELECT {} FROM {}", quoted.join(", "), quote_identifier(table)?);
        if let Some((limit, offset)) = page {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }
        trace!(sql = %sql, "Executing column query");

        let mut stmt = map_explorer_error!(conn.prepare(&sql), Store, "preparing query")?;
        let mut batch = ColumnBatch {
            columns: columns
                .iter()
                .map(|name| ColumnData {
                    name: name.clone(),
                    values: Vec::new(),
                    numeric: true,
                })
                .collect(),
        };

        let mut rows = map_explorer_error!(stmt.query([]), Store, "executing query")?;
        while let Some(row) = map_explorer_error!(rows.next(), Store, "reading row")? {
            for (idx, column) in batch.columns.iter_mut().enumerate() {
                let value = map_explorer_error!(row.get_ref(idx), Store, "reading value")?;
                let (number, numeric) = convert_value(value);
                column.values.push(number);
                column.numeric &= numeric;
            }
        }

        Ok(batch)
    }
}

/// Coerce one stored value to `f64`. The flag reports whether the value is
/// compatible with a numeric column.
fn convert_value(value: ValueRef<'_>) -> (f64, bool) {
    match value {
        ValueRef::Null => (f64::NAN, true),
        ValueRef::Integer(i) => (i as f64, true),
        ValueRef::Real(r) => (r, true),
        ValueRef::Text(bytes) => {
            let parsed = std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            (parsed, false)
        }
        ValueRef::Blob(_) => (f64::NAN, false),
    }
}

impl ColumnStore for SqliteStore {
    fn table_exists(&self, table: &str) -> ExplorerResult<bool> {
        let table = validate_table_name(table)?;
        let conn = self.reader()?;
        let count: i64 = map_explorer_error!(
            conn.query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            ),
            Store,
            "checking table"
        )?;
        Ok(count > 0)
    }

    fn fetch_columns(&self, table: &str, columns: &[String]) -> ExplorerResult<ColumnBatch> {
        self.select(table, columns, None)
    }

    fn fetch_page(
        &self,
        table: &str,
        columns: &[String],
        limit: u32,
        offset: u64,
    ) -> ExplorerResult<ColumnBatch> {
        self.select(table, columns, Some((limit, offset)))
    }
}
