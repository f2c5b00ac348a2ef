//! Data Manager crate for GeoExplorer
//! Dataset retrieval, spatial filtering, buffer packing and statistics over the
//! embedded column store

pub mod assembler;
pub mod boundary_index;
pub mod catalog;
pub mod fetcher;
pub mod manager;
pub mod packing;
pub mod statistics;
pub mod store;

pub use assembler::ResponseAssembler;
pub use boundary_index::{BoundaryIndex, ColumnStatistics};
pub use catalog::{table_name_for, DatasetCatalog};
pub use fetcher::{DataFetcher, FetchResult, FilterAxes};
pub use manager::{DataManager, DataManagerConfig};
pub use statistics::{
    compute_box_plot, compute_heatmap, compute_histogram, HeatmapAxes, StatisticsConfig,
    DEFAULT_HEATMAP_GRID_SIZE, DEFAULT_HISTOGRAM_BINS,
};
pub use store::{quote_identifier, CellValue, ColumnBatch, ColumnData, ColumnStore, SqliteStore};
