//! Dataset records
//!
//! A dataset ties an identifier to its backing table and the ordered column
//! mappings chosen by the user. Records live in the `datasets` metadata table
//! of the same database as the data.

use geoexplorer_shared::{map_explorer_error, ColumnMapping, Dataset, ExplorerError, ExplorerResult};
use rusqlite::{params, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::store::{validate_table_name, SqliteStore};

/// Backing table name for an imported file
pub fn table_name_for(file_id: &str) -> String {
    format!("data_{}", file_id.replace('-', "_"))
}

/// Lookup and lifecycle of dataset records
pub trait DatasetCatalog: Send + Sync {
    fn get_dataset(&self, dataset_id: &str) -> ExplorerResult<Option<Dataset>>;

    fn register_dataset(
        &self,
        table_name: &str,
        total_rows: u64,
        column_mappings: Vec<ColumnMapping>,
    ) -> ExplorerResult<Dataset>;

    /// Replace the mapping list in place (rename, add or remove columns).
    fn update_mappings(
        &self,
        dataset_id: &str,
        column_mappings: Vec<ColumnMapping>,
    ) -> ExplorerResult<Dataset>;

    /// Remove the record, its statistics and its backing table.
    /// Returns false when the dataset did not exist.
    fn delete_dataset(&self, dataset_id: &str) -> ExplorerResult<bool>;
}

impl DatasetCatalog for SqliteStore {
    fn get_dataset(&self, dataset_id: &str) -> ExplorerResult<Option<Dataset>> {
        let conn = self.reader()?;
        let row = map_explorer_error!(
            conn.query_row(
                "SELECT id, table_name, total_rows, column_mappings, created_at
                 FROM datasets WHERE id = ?1",
                [dataset_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional(),
            Store,
            "loading dataset"
        )?;

        let Some((id, table_name, total_rows, mappings_json, created_at)) = row else {
            return Ok(None);
        };

        let column_mappings: Vec<ColumnMapping> = serde_json::from_str(&mappings_json)?;
        Ok(Some(Dataset {
            id,
            table_name,
            total_rows: total_rows.max(0) as u64,
            column_mappings,
            created_at,
        }))
    }

    fn register_dataset(
        &self,
        table_name: &str,
        total_rows: u64,
        column_mappings: Vec<ColumnMapping>,
    ) -> ExplorerResult<Dataset> {
        validate_table_name(table_name)?;

        let dataset = Dataset {
            id: Uuid::new_v4().to_string(),
            table_name: table_name.to_string(),
            total_rows,
            column_mappings,
            created_at: chrono::Utc::now().timestamp(),
        };
        let mappings_json = serde_json::to_string(&dataset.column_mappings)?;

        let conn = self.writer()?;
        map_explorer_error!(
            conn.execute(
                "INSERT INTO datasets (id, table_name, total_rows, column_mappings, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    dataset.id,
                    dataset.table_name,
                    dataset.total_rows as i64,
                    mappings_json,
                    dataset.created_at
                ],
            ),
            Store,
            "registering dataset"
        )?;

        info!(dataset_id = %dataset.id, table = %dataset.table_name, "Registered dataset");
        Ok(dataset)
    }

    fn update_mappings(
        &self,
        dataset_id: &str,
        column_mappings: Vec<ColumnMapping>,
    ) -> ExplorerResult<Dataset> {
        let mappings_json = serde_json::to_string(&column_mappings)?;

        let conn = self.writer()?;
        let changed = map_explorer_error!(
            conn.execute(
                "UPDATE datasets SET column_mappings = ?1 WHERE id = ?2",
                params![mappings_json, dataset_id],
            ),
            Store,
            "updating mappings"
        )?;
        drop(conn);

        if changed == 0 {
            return Err(ExplorerError::DatasetNotFound {
                dataset_id: dataset_id.to_string(),
            });
        }

        self.get_dataset(dataset_id)?
            .ok_or_else(|| ExplorerError::DatasetNotFound {
                dataset_id: dataset_id.to_string(),
            })
    }

    fn delete_dataset(&self, dataset_id: &str) -> ExplorerResult<bool> {
        let Some(dataset) = self.get_dataset(dataset_id)? else {
            return Ok(false);
        };

        self.drop_table(&dataset.table_name)?;

        let mut conn = self.writer()?;
        let tx = map_explorer_error!(conn.transaction(), Store, "starting delete")?;
        map_explorer_error!(
            tx.execute("DELETE FROM column_stats WHERE dataset_id = ?1", [dataset_id]),
            Store,
            "deleting statistics"
        )?;
        map_explorer_error!(
            tx.execute("DELETE FROM datasets WHERE id = ?1", [dataset_id]),
            Store,
            "deleting dataset"
        )?;
        map_explorer_error!(tx.commit(), Store, "committing delete")?;

        info!(dataset_id, table = %dataset.table_name, "Deleted dataset");
        Ok(true)
    }
}
