//! Dataset fetcher with spatial filtering
//!
//! One fetch is one columnar query: the requested columns (plus any filter
//! columns the caller did not ask for) are read in a single round-trip, masked
//! by the optional bounding box in lock-step and packed into an interleaved
//! buffer. Boundaries are computed from the same pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use geoexplorer_shared::{BoundingBox, ColumnBoundary, ColumnType, Dataset, ExplorerError, ExplorerResult};
use tracing::{debug, error};

use crate::catalog::DatasetCatalog;
use crate::packing;
use crate::store::{ColumnBatch, ColumnStore};

/// Packed result of one fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    /// Row-major, column-minor values; stride is `columns.len()`
    pub buffer: Vec<f32>,
    pub columns: Vec<String>,
    pub boundaries: HashMap<String, ColumnBoundary>,
    /// Whether a bounding box was applied before packing
    pub filtered: bool,
}

impl FetchResult {
    pub fn empty(columns: &[String]) -> Self {
        Self {
            columns: columns.to_vec(),
            ..Default::default()
        }
    }

    pub fn stride(&self) -> usize {
        self.columns.len()
    }

    pub fn point_count(&self) -> usize {
        packing::row_count(self.buffer.len(), self.stride())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Position of `name` in the interleaving stride
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of column `index`, in row order
    pub fn column_values(&self, index: usize) -> Vec<f32> {
        packing::column_slice(&self.buffer, self.stride(), index).collect()
    }
}

/// Columns a bounding box is evaluated against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterAxes {
    pub x: String,
    pub y: String,
    pub z: Option<String>,
}

impl FilterAxes {
    /// Explicit filter columns win when at least `x` and `y` are given,
    /// otherwise the first two (three for a 3D box) requested columns are used.
    pub fn resolve(
        columns: &[String],
        filter_columns: Option<&[String]>,
        bbox: &BoundingBox,
    ) -> ExplorerResult<Self> {
        let source = match filter_columns {
            Some(explicit) if explicit.len() >= 2 => explicit,
            _ => columns,
        };

        match source {
            [x, y, rest @ ..] => Ok(Self {
                x: x.clone(),
                y: y.clone(),
                z: rest.first().filter(|_| bbox.is_3d()).cloned(),
            }),
            _ => Err(ExplorerError::InvalidRequest {
                message: "a bounding box needs at least two filter columns".to_string(),
            }),
        }
    }

    fn names(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.x)
            .chain(std::iter::once(&self.y))
            .chain(self.z.iter())
    }
}

/// Fetches dataset columns from the store
pub struct DataFetcher<S> {
    store: Arc<S>,
}

impl<S> Clone for DataFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> DataFetcher<S>
where
    S: ColumnStore + DatasetCatalog,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolve `dataset_id` and fetch `columns` from its table.
    pub fn fetch(
        &self,
        dataset_id: &str,
        columns: &[String],
        bbox: Option<&BoundingBox>,
        filter_columns: Option<&[String]>,
    ) -> ExplorerResult<FetchResult> {
        let dataset = self.resolve(dataset_id)?;
        self.fetch_dataset(&dataset, columns, bbox, filter_columns)
    }

    /// Look up a dataset record, failing with `DatasetNotFound`.
    pub fn resolve(&self, dataset_id: &str) -> ExplorerResult<Dataset> {
        let result = self.store.get_dataset(dataset_id).and_then(|found| {
            found.ok_or_else(|| ExplorerError::DatasetNotFound {
                dataset_id: dataset_id.to_string(),
            })
        });
        if let Err(e) = &result {
            error!(dataset_id, kind = e.kind(), error = %e, "Failed to resolve dataset");
        }
        result
    }

    /// Fetch from an already resolved dataset.
    pub fn fetch_dataset(
        &self,
        dataset: &Dataset,
        columns: &[String],
        bbox: Option<&BoundingBox>,
        filter_columns: Option<&[String]>,
    ) -> ExplorerResult<FetchResult> {
        let start = Instant::now();
        let result = self.fetch_inner(dataset, columns, bbox, filter_columns);

        match &result {
            Ok(fetched) => debug!(
                dataset_id = %dataset.id,
                columns = columns.len(),
                points = fetched.point_count(),
                filtered = fetched.filtered,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Fetched dataset columns"
            ),
            Err(e) => error!(
                dataset_id = %dataset.id,
                table = %dataset.table_name,
                kind = e.kind(),
                error = %e,
                "Dataset fetch failed"
            ),
        }
        result
    }

    fn fetch_inner(
        &self,
        dataset: &Dataset,
        columns: &[String],
        bbox: Option<&BoundingBox>,
        filter_columns: Option<&[String]>,
    ) -> ExplorerResult<FetchResult> {
        if columns.is_empty() {
            return Ok(FetchResult::empty(columns));
        }

        let axes = bbox
            .map(|b| FilterAxes::resolve(columns, filter_columns, b))
            .transpose()?;

        // Filter columns outside the request ride along in the same query
        let mut query_columns = columns.to_vec();
        if let Some(axes) = &axes {
            for name in axes.names() {
                if !query_columns.contains(name) {
                    query_columns.push(name.clone());
                }
            }
        }

        let batch = self.store.fetch_columns(&dataset.table_name, &query_columns)?;
        if batch.is_empty() {
            return Ok(FetchResult::empty(columns));
        }

        let keep = match (bbox, &axes) {
            (Some(bbox), Some(axes)) => Some(bounding_box_mask(&batch, axes, bbox)?),
            _ => None,
        };

        let selected: Vec<Vec<f64>> = batch.columns[..columns.len()]
            .iter()
            .map(|column| match &keep {
                Some(mask) => column
                    .values
                    .iter()
                    .zip(mask)
                    .filter_map(|(&v, &k)| k.then_some(v))
                    .collect(),
                None => column.values.clone(),
            })
            .collect();

        let mut boundaries = HashMap::new();
        for (data, values) in batch.columns[..columns.len()].iter().zip(&selected) {
            let categorical = dataset
                .column_mappings
                .iter()
                .any(|m| m.column_name == data.name && m.column_type == ColumnType::Categorical);
            if !data.numeric || categorical {
                continue;
            }
            if let Some(boundary) = ColumnBoundary::from_values(values.iter().copied()) {
                boundaries.insert(data.name.clone(), boundary);
            }
        }

        Ok(FetchResult {
            buffer: packing::interleave(&selected),
            columns: columns.to_vec(),
            boundaries,
            filtered: keep.is_some(),
        })
    }
}

/// Row mask for `bbox`. NaN coordinates never fall inside a box.
fn bounding_box_mask(
    batch: &ColumnBatch,
    axes: &FilterAxes,
    bbox: &BoundingBox,
) -> ExplorerResult<Vec<bool>> {
    let values = |name: &str| {
        batch
            .column(name)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| ExplorerError::Internal {
                message: format!("filter column {name:?} missing from fetch"),
            })
    };

    let xs = values(&axes.x)?;
    let ys = values(&axes.y)?;
    let zs = match (&axes.z, bbox.z) {
        (Some(z), Some(_)) => Some(values(z)?),
        _ => None,
    };

    Ok((0..batch.row_count())
        .map(|row| {
            bbox.contains_xy(xs[row], ys[row])
                && zs.map_or(true, |zs| bbox.contains_z(zs[row]))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ColumnData, SqliteStore};
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn batch(columns: &[(&str, Vec<f64>)]) -> ColumnBatch {
        ColumnBatch {
            columns: columns
                .iter()
                .map(|(name, values)| ColumnData {
                    name: name.to_string(),
                    values: values.clone(),
                    numeric: true,
                })
                .collect(),
        }
    }

    #[test]
    fn test_filter_axes_positional() {
        let bbox = BoundingBox::new_2d(0.0, 1.0, 0.0, 1.0);
        let axes = FilterAxes::resolve(&names(&["a", "b", "c"]), None, &bbox).unwrap();
        assert_eq!(axes.x, "a");
        assert_eq!(axes.y, "b");
        assert_eq!(axes.z, None);

        let bbox = BoundingBox::new_3d(0.0, 1.0, 0.0, 1.0, 0.0, 1.0);
        let axes = FilterAxes::resolve(&names(&["a", "b", "c"]), None, &bbox).unwrap();
        assert_eq!(axes.z.as_deref(), Some("c"));
    }

    #[test]
    fn test_filter_axes_explicit_wins() {
        let bbox = BoundingBox::new_2d(0.0, 1.0, 0.0, 1.0);
        let explicit = names(&["east", "north"]);
        let axes = FilterAxes::resolve(&names(&["a", "b"]), Some(&explicit), &bbox).unwrap();
        assert_eq!(axes.x, "east");
        assert_eq!(axes.y, "north");

        // A single explicit column is not enough, fall back to positions
        let partial = names(&["east"]);
        let axes = FilterAxes::resolve(&names(&["a", "b"]), Some(&partial), &bbox).unwrap();
        assert_eq!(axes.x, "a");
    }

    #[test]
    fn test_filter_axes_needs_two_columns() {
        let bbox = BoundingBox::new_2d(0.0, 1.0, 0.0, 1.0);
        let err = FilterAxes::resolve(&names(&["a"]), None, &bbox).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_mask_3d_and_nan() {
        let data = batch(&[
            ("x", vec![0.0, 1.0, 2.0, f64::NAN]),
            ("y", vec![0.0, 1.0, 2.0, 1.0]),
            ("z", vec![5.0, 50.0, 5.0, 5.0]),
        ]);
        let axes = FilterAxes {
            x: "x".into(),
            y: "y".into(),
            z: Some("z".into()),
        };
        let bbox = BoundingBox::new_3d(0.0, 2.0, 0.0, 2.0, 0.0, 10.0);
        let mask = bounding_box_mask(&data, &axes, &bbox).unwrap();
        assert_eq!(mask, vec![true, false, true, false]);
    }

    fn seeded_store() -> (TempDir, Arc<SqliteStore>, String) {
        use crate::store::CellValue;
        use geoexplorer_shared::ColumnMapping;

        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("fetch.db")).unwrap();
        let mappings = vec![
            ColumnMapping::numeric("x"),
            ColumnMapping::numeric("y"),
            ColumnMapping::numeric("z"),
            ColumnMapping::categorical("rock"),
        ];
        let rows: Vec<Vec<CellValue>> = (0..4)
            .map(|i| {
                vec![
                    (i as f64).into(),
                    (i as f64).into(),
                    ((i + 1) as f64 * 10.0).into(),
                    "granite".into(),
                ]
            })
            .collect();
        store.import_table("data_fetch", &mappings, &rows).unwrap();
        let dataset = store.register_dataset("data_fetch", 4, mappings).unwrap();
        (dir, Arc::new(store), dataset.id)
    }

    #[test]
    fn test_fetch_unfiltered() {
        let (_dir, store, id) = seeded_store();
        let fetcher = DataFetcher::new(store);
        let result = fetcher.fetch(&id, &names(&["x", "y", "z"]), None, None).unwrap();

        assert_eq!(
            result.buffer,
            vec![0.0, 0.0, 10.0, 1.0, 1.0, 20.0, 2.0, 2.0, 30.0, 3.0, 3.0, 40.0]
        );
        assert_eq!(result.point_count(), 4);
        assert!(!result.filtered);
        assert_eq!(result.boundaries["z"].min_value, 10.0);
        assert_eq!(result.boundaries["z"].max_value, 40.0);
        assert_eq!(result.boundaries["x"].valid_count, 4);
    }

    #[test]
    fn test_fetch_auxiliary_filter_column() {
        let (_dir, store, id) = seeded_store();
        let fetcher = DataFetcher::new(store);
        let bbox = BoundingBox::new_2d(0.5, 2.5, 0.5, 2.5);
        let filter = names(&["x", "y"]);

        // Only z is requested, x and y drive the mask
        let result = fetcher
            .fetch(&id, &names(&["z"]), Some(&bbox), Some(&filter))
            .unwrap();
        assert_eq!(result.columns, names(&["z"]));
        assert_eq!(result.buffer, vec![20.0, 30.0]);
        assert!(result.filtered);
        assert_eq!(result.boundaries.len(), 1);
    }

    #[test]
    fn test_fetch_skips_categorical_boundaries() {
        let (_dir, store, id) = seeded_store();
        let fetcher = DataFetcher::new(store);
        let result = fetcher.fetch(&id, &names(&["x", "rock"]), None, None).unwrap();
        assert_eq!(result.point_count(), 4);
        assert!(result.boundaries.contains_key("x"));
        assert!(!result.boundaries.contains_key("rock"));
        assert!(result.column_values(1).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_fetch_empty_columns_and_unknown_dataset() {
        let (_dir, store, id) = seeded_store();
        let fetcher = DataFetcher::new(store);

        let empty = fetcher.fetch(&id, &[], None, None).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.point_count(), 0);

        let err = fetcher.fetch("missing", &names(&["x"]), None, None).unwrap_err();
        assert!(matches!(err, ExplorerError::DatasetNotFound { .. }));

        let err = fetcher.fetch(&id, &names(&["ghost"]), None, None).unwrap_err();
        assert!(matches!(err, ExplorerError::Store { .. }));
    }
}
