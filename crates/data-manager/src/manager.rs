//! Core DataManager implementation
//!
//! The DataManager is the single entry point the transport calls into:
//! - Resolving datasets and their coordinate columns
//! - Running the visualization and statistics fetches
//! - Assembling the combined reply
//! - Paging raw table rows and proxying the boundary index

use std::path::Path;
use std::sync::Arc;

use geoexplorer_shared::{
    DataBoundary, Dataset, DatasetDataRequest, DatasetDataResponse, ExplorerError, ExplorerResult,
    TablePage, TablePageRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::assembler::ResponseAssembler;
use crate::boundary_index::{BoundaryIndex, ColumnStatistics};
use crate::catalog::DatasetCatalog;
use crate::fetcher::DataFetcher;
use crate::statistics::StatisticsConfig;
use crate::store::{ColumnStore, SqliteStore};

/// Configuration for the DataManager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataManagerConfig {
    #[serde(flatten)]
    pub statistics: StatisticsConfig,
    /// Visualization columns used when neither the request nor the mappings name any
    pub default_columns: Vec<String>,
}

impl Default for DataManagerConfig {
    fn default() -> Self {
        Self {
            statistics: StatisticsConfig::default(),
            default_columns: vec!["x".to_string(), "y".to_string(), "z".to_string()],
        }
    }
}

/// The main DataManager struct
pub struct DataManager<S = SqliteStore> {
    fetcher: DataFetcher<S>,
    assembler: ResponseAssembler,
    config: DataManagerConfig,
}

impl DataManager<SqliteStore> {
    /// Open the SQLite store at `path` and build a manager over it
    pub fn open(path: impl AsRef<Path>, config: DataManagerConfig) -> ExplorerResult<Self> {
        let store = SqliteStore::open(path)?;
        Ok(Self::new(Arc::new(store), config))
    }
}

impl<S> DataManager<S>
where
    S: ColumnStore + DatasetCatalog + BoundaryIndex,
{
    pub fn new(store: Arc<S>, config: DataManagerConfig) -> Self {
        Self {
            fetcher: DataFetcher::new(store),
            assembler: ResponseAssembler::new(config.statistics),
            config,
        }
    }

    pub fn config(&self) -> &DataManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        self.fetcher.store()
    }

    /// Fetch point data for the visualization columns and statistics for every
    /// numeric column in one call.
    #[instrument(skip(self, request), fields(dataset_id = %request.dataset_id))]
    pub fn fetch_and_compute(&self, request: &DatasetDataRequest) -> ExplorerResult<DatasetDataResponse> {
        let dataset = self.fetcher.resolve(&request.dataset_id)?;

        let viz_columns = self.visualization_columns(&dataset, &request.columns);
        let filter_columns =
            self.filter_columns(&dataset, request.filter_columns.as_deref(), &viz_columns);
        let numeric_columns = request
            .statistics_columns
            .clone()
            .unwrap_or_else(|| dataset.numeric_columns());

        let bbox = request.bounding_box.as_ref();
        let viz = self
            .fetcher
            .fetch_dataset(&dataset, &viz_columns, bbox, filter_columns.as_deref())?;

        let stats = if numeric_columns.is_empty() {
            debug!("Dataset has no numeric columns, skipping statistics");
            None
        } else {
            Some(self.fetcher.fetch_dataset(
                &dataset,
                &numeric_columns,
                bbox,
                filter_columns.as_deref(),
            )?)
        };

        let response = self.assembler.assemble(&viz, stats.as_ref());
        info!(
            points = response.total_count,
            histograms = response.histograms.len(),
            filtered = response.boundaries_filtered,
            "Assembled dataset reply"
        );
        Ok(response)
    }

    /// Requested columns, else the mapped coordinates, else the configured defaults.
    fn visualization_columns(&self, dataset: &Dataset, requested: &[String]) -> Vec<String> {
        if !requested.is_empty() {
            return requested.to_vec();
        }
        let coords = dataset.coordinate_columns();
        match (coords.x, coords.y, coords.z) {
            (Some(x), Some(y), Some(z)) => vec![x, y, z],
            _ => self.config.default_columns.clone(),
        }
    }

    /// Explicit filter columns, else one column per axis: the mapped coordinate,
    /// or the visualization column at that position when the axis is unmapped.
    /// The same list drives both fetches so the box cuts the point cloud and the
    /// statistics on the same columns.
    fn filter_columns(
        &self,
        dataset: &Dataset,
        explicit: Option<&[String]>,
        viz_columns: &[String],
    ) -> Option<Vec<String>> {
        if let Some(explicit) = explicit.filter(|c| c.len() >= 2) {
            return Some(explicit.to_vec());
        }
        let coords = dataset.coordinate_columns();
        let positional = |i: usize| viz_columns.get(i).cloned();
        let x = coords.x.or_else(|| positional(0))?;
        let y = coords.y.or_else(|| positional(1))?;
        let z = coords.z.or_else(|| positional(2));
        Some([Some(x), Some(y), z].into_iter().flatten().collect())
    }

    /// One page of raw rows. Missing values come back as 0.0.
    pub fn table_page(&self, request: &TablePageRequest) -> ExplorerResult<TablePage> {
        let dataset = self.fetcher.resolve(&request.dataset_id)?;

        let columns = if request.columns.is_empty() {
            dataset.numeric_columns()
        } else {
            request.columns.clone()
        };
        if columns.is_empty() {
            return Err(ExplorerError::InvalidRequest {
                message: format!("dataset {} has no numeric columns", dataset.id),
            });
        }

        let batch = self.store().fetch_page(
            &dataset.table_name,
            &columns,
            request.limit,
            request.offset,
        )?;

        let rows = (0..batch.row_count())
            .map(|row| {
                batch
                    .columns
                    .iter()
                    .map(|c| match c.values[row] {
                        v if v.is_nan() => 0.0,
                        v => v,
                    })
                    .collect()
            })
            .collect();

        Ok(TablePage {
            total_rows: dataset.total_rows,
            column_names: columns,
            rows,
        })
    }

    /// Stored whole-dataset boundaries, in mapping order.
    pub fn boundaries(&self, dataset_id: &str) -> ExplorerResult<Vec<DataBoundary>> {
        let dataset = self.fetcher.resolve(dataset_id)?;
        let stored = self.store().boundaries(dataset_id)?;

        Ok(dataset
            .column_mappings
            .iter()
            .filter_map(|m| {
                stored
                    .get(&m.column_name)
                    .map(|b| DataBoundary::new(&m.column_name, b))
            })
            .collect())
    }

    pub fn refresh_statistics(&self, dataset_id: &str) -> ExplorerResult<Vec<ColumnStatistics>> {
        self.store().refresh(dataset_id)
    }
}
