//! Shared types for GeoExplorer
//!
//! This crate contains the data model shared between the data-manager core and
//! the server transport: dataset records, column mappings, boundaries, the
//! statistics result shapes and the request/reply types.

pub mod errors;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use errors::{ErrorContext, ErrorResponse, ExplorerError, ExplorerResult};

/// Semantic type of a mapped column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Categorical,
}

/// How one stored column is interpreted by the explorer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMapping {
    pub column_name: String,
    pub column_type: ColumnType,
    /// Logical field this column feeds (`x`, `y`, `z` or any other label)
    #[serde(default)]
    pub mapped_field: Option<String>,
    #[serde(default)]
    pub is_coordinate: bool,
}

impl ColumnMapping {
    pub fn numeric(name: &str) -> Self {
        Self {
            column_name: name.to_string(),
            column_type: ColumnType::Numeric,
            mapped_field: None,
            is_coordinate: false,
        }
    }

    pub fn categorical(name: &str) -> Self {
        Self {
            column_name: name.to_string(),
            column_type: ColumnType::Categorical,
            mapped_field: None,
            is_coordinate: false,
        }
    }

    /// Numeric column flagged as the given coordinate axis
    pub fn coordinate(name: &str, axis: &str) -> Self {
        Self {
            column_name: name.to_string(),
            column_type: ColumnType::Numeric,
            mapped_field: Some(axis.to_string()),
            is_coordinate: true,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.column_type == ColumnType::Numeric
    }
}

/// Coordinate columns resolved from mapping metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinateColumns {
    pub x: Option<String>,
    pub y: Option<String>,
    pub z: Option<String>,
}

/// One imported, column-mapped table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub id: String,
    pub table_name: String,
    pub total_rows: u64,
    pub column_mappings: Vec<ColumnMapping>,
    pub created_at: i64,
}

impl Dataset {
    /// Names of numeric columns, in mapping order
    pub fn numeric_columns(&self) -> Vec<String> {
        self.column_mappings
            .iter()
            .filter(|m| m.is_numeric())
            .map(|m| m.column_name.clone())
            .collect()
    }

    /// Coordinate columns declared by the mappings. Only mappings flagged as
    /// coordinates whose mapped field is `x`, `y` or `z` count.
    pub fn coordinate_columns(&self) -> CoordinateColumns {
        let mut coords = CoordinateColumns::default();
        for mapping in self.column_mappings.iter().filter(|m| m.is_coordinate) {
            let slot = match mapping.mapped_field.as_deref() {
                Some("x") => &mut coords.x,
                Some("y") => &mut coords.y,
                Some("z") => &mut coords.z,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(mapping.column_name.clone());
            }
        }
        coords
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_mappings.iter().any(|m| m.column_name == name)
    }
}

/// `{min, max, validCount}` summary of one numeric column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ColumnBoundary {
    pub min_value: f64,
    pub max_value: f64,
    pub valid_count: u64,
}

impl ColumnBoundary {
    /// Boundary over the non-NaN values, `None` when there are none.
    pub fn from_values<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut boundary: Option<ColumnBoundary> = None;
        for value in values.into_iter().filter(|v| !v.is_nan()) {
            match boundary.as_mut() {
                Some(b) => {
                    b.min_value = b.min_value.min(value);
                    b.max_value = b.max_value.max(value);
                    b.valid_count += 1;
                }
                None => {
                    boundary = Some(ColumnBoundary {
                        min_value: value,
                        max_value: value,
                        valid_count: 1,
                    })
                }
            }
        }
        boundary
    }
}

/// Axis-aligned spatial filter, 2D or 3D. All ranges are inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: (f64, f64),
    pub y: (f64, f64),
    pub z: Option<(f64, f64)>,
}

impl BoundingBox {
    pub fn new_2d(x1: f64, x2: f64, y1: f64, y2: f64) -> Self {
        Self {
            x: (x1, x2),
            y: (y1, y2),
            z: None,
        }
    }

    pub fn new_3d(x1: f64, x2: f64, y1: f64, y2: f64, z1: f64, z2: f64) -> Self {
        Self {
            x: (x1, x2),
            y: (y1, y2),
            z: Some((z1, z2)),
        }
    }

    /// Parse `[x1,x2,y1,y2]` or `[x1,x2,y1,y2,z1,z2]`
    pub fn from_slice(values: &[f64]) -> ExplorerResult<Self> {
        match *values {
            [x1, x2, y1, y2] => Ok(Self::new_2d(x1, x2, y1, y2)),
            [x1, x2, y1, y2, z1, z2] => Ok(Self::new_3d(x1, x2, y1, y2, z1, z2)),
            _ => Err(ExplorerError::InvalidRequest {
                message: format!(
                    "bounding box must have 4 or 6 values, got {}",
                    values.len()
                ),
            }),
        }
    }

    pub fn is_3d(&self) -> bool {
        self.z.is_some()
    }

    #[inline]
    pub fn contains_xy(&self, x: f64, y: f64) -> bool {
        x >= self.x.0 && x <= self.x.1 && y >= self.y.0 && y <= self.y.1
    }

    /// Always true for a 2D box
    #[inline]
    pub fn contains_z(&self, z: f64) -> bool {
        match self.z {
            Some((z1, z2)) => z >= z1 && z <= z2,
            None => true,
        }
    }
}

/// Equal-width histogram of one column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistogramResult {
    pub bin_ranges: Vec<String>,
    pub bin_counts: Vec<u64>,
    pub bin_edges: Vec<f64>,
    pub num_bins: usize,
    pub min_value: f64,
    pub max_value: f64,
    pub total_count: u64,
}

/// Box-plot statistics of one column. `min`/`max` exclude outliers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoxPlotResult {
    pub column_name: String,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
    pub iqr: f64,
    pub lower_fence: f64,
    pub upper_fence: f64,
    pub outliers: Vec<f64>,
    pub total_count: u64,
}

/// One occupied bucket of the heatmap grid
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HeatmapCell {
    pub x_index: u32,
    pub y_index: u32,
    pub avg_value: f64,
    pub count: u64,
}

/// Sparse 2D binned aggregation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeatmapResult {
    pub cells: Vec<HeatmapCell>,
    pub grid_size_x: u32,
    pub grid_size_y: u32,
    /// Smallest per-cell average
    pub min_value: f64,
    /// Largest per-cell average
    pub max_value: f64,
    pub x_bin_size: f64,
    pub y_bin_size: f64,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub x_column: String,
    pub y_column: String,
    pub value_column: String,
}

/// Boundary entry as emitted in replies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataBoundary {
    pub column_name: String,
    pub min_value: f64,
    pub max_value: f64,
    pub valid_count: u64,
}

impl DataBoundary {
    pub fn new(column_name: &str, boundary: &ColumnBoundary) -> Self {
        Self {
            column_name: column_name.to_string(),
            min_value: boundary.min_value,
            max_value: boundary.max_value,
            valid_count: boundary.valid_count,
        }
    }
}

/// Request for point data plus statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetDataRequest {
    pub dataset_id: String,
    /// Visualization columns; empty means the configured defaults
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    /// Explicit `[x, y, z]` filter columns, overriding the coordinate mappings
    #[serde(default)]
    pub filter_columns: Option<Vec<String>>,
    /// Columns to compute statistics over; `None` means every numeric column
    #[serde(default)]
    pub statistics_columns: Option<Vec<String>>,
}

/// Reply for [`DatasetDataRequest`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetDataResponse {
    /// Row-major little-endian f32 payload, sent outside the JSON header
    #[serde(skip)]
    pub binary_data: Vec<u8>,
    /// Number of f32 values in `binary_data`
    pub data_length: usize,
    /// Number of points in `binary_data`
    pub total_count: usize,
    pub columns: Vec<String>,
    pub data_boundaries: Vec<DataBoundary>,
    /// True when the boundaries describe a bounding-box subset rather than the whole dataset
    pub boundaries_filtered: bool,
    pub histograms: BTreeMap<String, HistogramResult>,
    pub box_plots: Vec<BoxPlotResult>,
    pub heatmap: Option<HeatmapResult>,
}

impl DatasetDataResponse {
    pub fn is_empty(&self) -> bool {
        self.data_length == 0
    }
}

/// Paginated table request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePageRequest {
    pub dataset_id: String,
    #[serde(default)]
    pub columns: Vec<String>,
    pub limit: u32,
    #[serde(default)]
    pub offset: u64,
}

/// One page of table rows. Missing values are reported as 0.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TablePage {
    pub total_rows: u64,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}
