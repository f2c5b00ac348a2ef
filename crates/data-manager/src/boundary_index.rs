//! Persisted per-column statistics
//!
//! Statistics are computed over the full table whenever the data changes and
//! stored in `column_stats`. Readers use them for whole-dataset axis scaling
//! without rescanning the table.

use std::collections::HashMap;

use geoexplorer_shared::{
    map_explorer_error, ColumnBoundary, ColumnType, ExplorerError, ExplorerResult,
};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::catalog::DatasetCatalog;
use crate::statistics::summarize;
use crate::store::{quote_identifier, validate_table_name, ColumnStore, SqliteStore};

/// Stored statistics of one column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStatistics {
    pub column_name: String,
    pub column_type: ColumnType,
    pub count: u64,
    pub null_count: u64,
    pub unique_count: u64,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min_value: Option<f64>,
    pub q25: Option<f64>,
    pub q50: Option<f64>,
    pub q75: Option<f64>,
    pub max_value: Option<f64>,
}

pub trait BoundaryIndex: Send + Sync {
    /// `{min, max, validCount}` of every numeric column with stored statistics.
    fn boundaries(&self, dataset_id: &str) -> ExplorerResult<HashMap<String, ColumnBoundary>>;

    /// Recompute and persist statistics for every mapped column.
    fn refresh(&self, dataset_id: &str) -> ExplorerResult<Vec<ColumnStatistics>>;
}

fn column_type_name(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Numeric => "numeric",
        ColumnType::Categorical => "categorical",
    }
}

/// Non-null, null and distinct counts straight from SQL, so text categories
/// count too.
fn presence_counts(conn: &Connection, table: &str, column: &str) -> ExplorerResult<(u64, u64, u64)> {
    let column = quote_identifier(column)?;
    let table = quote_identifier(validate_table_name(table)?)?;
    let (present, nulls, unique): (i64, i64, i64) = map_explorer_error!(
        conn.query_row(
            &format!(
                "SELECT COUNT({column}), COUNT(*) - COUNT({column}), COUNT(DISTINCT {column}) FROM {table}"
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        ),
        Store,
        "counting values"
    )?;
    Ok((present as u64, nulls as u64, unique as u64))
}

impl BoundaryIndex for SqliteStore {
    fn boundaries(&self, dataset_id: &str) -> ExplorerResult<HashMap<String, ColumnBoundary>> {
        let conn = self.reader()?;
        let mut stmt = map_explorer_error!(
            conn.prepare(
                "SELECT column_name, min_value, max_value, count FROM column_stats
                 WHERE dataset_id = ?1 AND column_type = 'numeric'
                   AND min_value IS NOT NULL AND max_value IS NOT NULL"
            ),
            Store,
            "reading boundaries"
        )?;
        let rows = map_explorer_error!(
            stmt.query_map([dataset_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ColumnBoundary {
                        min_value: row.get(1)?,
                        max_value: row.get(2)?,
                        valid_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0).max(0) as u64,
                    },
                ))
            }),
            Store,
            "reading boundaries"
        )?;
        map_explorer_error!(
            rows.collect::<Result<HashMap<_, _>, _>>(),
            Store,
            "reading boundaries"
        )
    }

    fn refresh(&self, dataset_id: &str) -> ExplorerResult<Vec<ColumnStatistics>> {
        let dataset = self
            .get_dataset(dataset_id)?
            .ok_or_else(|| ExplorerError::DatasetNotFound {
                dataset_id: dataset_id.to_string(),
            })?;

        let numeric = dataset.numeric_columns();
        let batch = self.fetch_columns(&dataset.table_name, &numeric)?;

        let mut stats = Vec::with_capacity(dataset.column_mappings.len());
        {
            let conn = self.reader()?;
            for mapping in &dataset.column_mappings {
                let (present, null_count, unique_count) =
                    presence_counts(&conn, &dataset.table_name, &mapping.column_name)?;

                match mapping.column_type {
                    ColumnType::Numeric => {
                        let summary = batch
                            .column(&mapping.column_name)
                            .and_then(|c| summarize(&c.values));
                        let Some(summary) = summary else {
                            debug!(column = %mapping.column_name, "No valid values, skipping statistics");
                            continue;
                        };
                        stats.push(ColumnStatistics {
                            column_name: mapping.column_name.clone(),
                            column_type: ColumnType::Numeric,
                            count: summary.count,
                            null_count,
                            unique_count,
                            mean: Some(summary.mean),
                            std: summary.std,
                            min_value: Some(summary.min),
                            q25: Some(summary.q25),
                            q50: Some(summary.q50),
                            q75: Some(summary.q75),
                            max_value: Some(summary.max),
                        });
                    }
                    ColumnType::Categorical => stats.push(ColumnStatistics {
                        column_name: mapping.column_name.clone(),
                        column_type: ColumnType::Categorical,
                        count: present,
                        null_count,
                        unique_count,
                        mean: None,
                        std: None,
                        min_value: None,
                        q25: None,
                        q50: None,
                        q75: None,
                        max_value: None,
                    }),
                }
            }
        }

        let mut conn = self.writer()?;
        let tx = map_explorer_error!(conn.transaction(), Store, "starting statistics refresh")?;
        map_explorer_error!(
            tx.execute("DELETE FROM column_stats WHERE dataset_id = ?1", [dataset_id]),
            Store,
            "clearing statistics"
        )?;
        let created_at = chrono::Utc::now().timestamp();
        for s in &stats {
            map_explorer_error!(
                tx.execute(
                    "INSERT INTO column_stats (dataset_id, column_name, column_type, count, mean,
                        std, min_value, q25, q50, q75, max_value, null_count, unique_count, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    params![
                        dataset_id,
                        s.column_name,
                        column_type_name(s.column_type),
                        s.count as i64,
                        s.mean,
                        s.std,
                        s.min_value,
                        s.q25,
                        s.q50,
                        s.q75,
                        s.max_value,
                        s.null_count as i64,
                        s.unique_count as i64,
                        created_at
                    ],
                ),
                Store,
                "storing statistics"
            )?;
        }
        map_explorer_error!(tx.commit(), Store, "committing statistics")?;

        info!(dataset_id, columns = stats.len(), "Refreshed column statistics");
        Ok(stats)
    }
}
