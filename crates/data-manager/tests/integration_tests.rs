//! Integration tests for the data manager

use std::sync::Arc;

use geoexplorer_data::packing::{deinterleave, from_le_bytes};
use geoexplorer_data::{
    BoundaryIndex, CellValue, DataFetcher, DataManager, DataManagerConfig, DatasetCatalog,
    SqliteStore,
};
use geoexplorer_shared::{
    BoundingBox, ColumnMapping, DatasetDataRequest, ExplorerError, TablePageRequest,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    manager: DataManager,
    dataset_id: String,
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Four rows `(0,0,10) (1,1,20) (2,2,30) (3,3,40)` plus a categorical column.
fn four_point_dataset() -> Fixture {
    let dir = TempDir::new().unwrap();
    let manager = DataManager::open(dir.path().join("explorer.db"), DataManagerConfig::default()).unwrap();

    let mappings = vec![
        ColumnMapping::numeric("x"),
        ColumnMapping::numeric("y"),
        ColumnMapping::numeric("z"),
        ColumnMapping::categorical("rock"),
    ];
    let rows: Vec<Vec<CellValue>> = (0..4)
        .map(|i| {
            vec![
                CellValue::Number(i as f64),
                CellValue::Number(i as f64),
                CellValue::Number((i + 1) as f64 * 10.0),
                CellValue::from(if i % 2 == 0 { "granite" } else { "basalt" }),
            ]
        })
        .collect();

    manager.store().import_table("data_four", &mappings, &rows).unwrap();
    let dataset = manager.store().register_dataset("data_four", 4, mappings).unwrap();

    Fixture {
        _dir: dir,
        manager,
        dataset_id: dataset.id,
    }
}

fn request(fixture: &Fixture, bbox: Option<BoundingBox>) -> DatasetDataRequest {
    DatasetDataRequest {
        dataset_id: fixture.dataset_id.clone(),
        columns: columns(&["x", "y", "z"]),
        bounding_box: bbox,
        ..Default::default()
    }
}

#[test]
fn test_unfiltered_fetch_packs_all_rows() {
    let fixture = four_point_dataset();
    let response = fixture.manager.fetch_and_compute(&request(&fixture, None)).unwrap();

    let buffer = from_le_bytes(&response.binary_data).unwrap();
    assert_eq!(
        buffer,
        vec![0.0, 0.0, 10.0, 1.0, 1.0, 20.0, 2.0, 2.0, 30.0, 3.0, 3.0, 40.0]
    );
    assert_eq!(response.data_length, 12);
    assert_eq!(response.total_count, 4);
    assert!(!response.boundaries_filtered);

    let expected = [("x", 0.0, 3.0), ("y", 0.0, 3.0), ("z", 10.0, 40.0)];
    assert_eq!(response.data_boundaries.len(), 3);
    for (boundary, (name, min, max)) in response.data_boundaries.iter().zip(expected) {
        assert_eq!(boundary.column_name, name);
        assert_eq!(boundary.min_value, min);
        assert_eq!(boundary.max_value, max);
        assert_eq!(boundary.valid_count, 4);
    }
}

#[test]
fn test_bounding_box_recomputes_boundaries() {
    let fixture = four_point_dataset();
    let bbox = BoundingBox::new_2d(0.5, 2.5, 0.5, 2.5);
    let response = fixture
        .manager
        .fetch_and_compute(&request(&fixture, Some(bbox)))
        .unwrap();

    let buffer = from_le_bytes(&response.binary_data).unwrap();
    assert_eq!(buffer, vec![1.0, 1.0, 20.0, 2.0, 2.0, 30.0]);
    assert_eq!(response.total_count, 2);
    assert!(response.boundaries_filtered);

    let z = response
        .data_boundaries
        .iter()
        .find(|b| b.column_name == "z")
        .unwrap();
    assert_eq!((z.min_value, z.max_value, z.valid_count), (20.0, 30.0, 2));

    // Statistics cover the filtered subset only
    assert_eq!(response.histograms["z"].total_count, 2);
}

#[test]
fn test_mask_keeps_columns_in_lock_step() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("mask.db")).unwrap());
    let mappings = vec![
        ColumnMapping::numeric("x"),
        ColumnMapping::numeric("y"),
        ColumnMapping::numeric("z"),
    ];
    let rows: Vec<Vec<CellValue>> = (0..200)
        .map(|i| {
            let x = (i % 20) as f64;
            let y = (i / 20) as f64;
            vec![x.into(), y.into(), (x * 100.0 + y).into()]
        })
        .collect();
    store.import_table("data_grid", &mappings, &rows).unwrap();
    let dataset = store.register_dataset("data_grid", 200, mappings).unwrap();

    let fetcher = DataFetcher::new(store);
    let bbox = BoundingBox::new_2d(3.0, 7.5, 2.0, 4.0);
    let result = fetcher
        .fetch(&dataset.id, &columns(&["x", "y", "z"]), Some(&bbox), None)
        .unwrap();

    let split = deinterleave(&result.buffer, 3);
    assert_eq!(split[0].len(), split[1].len());
    assert_eq!(split[1].len(), split[2].len());
    // x in 3..=7 (5 values), y in 2..=4 (3 values)
    assert_eq!(result.point_count(), 15);
    for ((&x, &y), &z) in split[0].iter().zip(&split[1]).zip(&split[2]) {
        assert!((3.0..=7.5).contains(&x));
        assert!((2.0..=4.0).contains(&y));
        assert_eq!(z, x * 100.0 + y);
    }
}

#[test]
fn test_three_dimensional_box() {
    let fixture = four_point_dataset();
    let bbox = BoundingBox::new_3d(0.0, 3.0, 0.0, 3.0, 15.0, 35.0);
    let response = fixture
        .manager
        .fetch_and_compute(&request(&fixture, Some(bbox)))
        .unwrap();

    let buffer = from_le_bytes(&response.binary_data).unwrap();
    assert_eq!(buffer, vec![1.0, 1.0, 20.0, 2.0, 2.0, 30.0]);
}

#[test]
fn test_explicit_filter_columns() {
    let fixture = four_point_dataset();
    let mut req = request(&fixture, Some(BoundingBox::new_2d(0.0, 1.0, 15.0, 45.0)));
    req.columns = columns(&["z", "y"]);
    req.filter_columns = Some(columns(&["x", "z"]));

    let response = fixture.manager.fetch_and_compute(&req).unwrap();
    let buffer = from_le_bytes(&response.binary_data).unwrap();
    // Only x = 1 satisfies both predicates
    assert_eq!(buffer, vec![20.0, 1.0]);
    assert_eq!(response.columns, columns(&["z", "y"]));
}

/// `grade` leads the numeric columns and nothing is flagged as a coordinate.
fn unmapped_dataset(mappings: Vec<ColumnMapping>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let manager = DataManager::open(dir.path().join("unmapped.db"), DataManagerConfig::default()).unwrap();

    let rows: Vec<Vec<CellValue>> = (0..4)
        .map(|i| {
            vec![
                CellValue::Number(100.0 + i as f64),
                CellValue::Number(i as f64),
                CellValue::Number(i as f64),
                CellValue::Number((i + 1) as f64 * 10.0),
            ]
        })
        .collect();

    manager.store().import_table("data_unmapped", &mappings, &rows).unwrap();
    let dataset = manager.store().register_dataset("data_unmapped", 4, mappings).unwrap();

    Fixture {
        _dir: dir,
        manager,
        dataset_id: dataset.id,
    }
}

#[test]
fn test_statistics_filtered_on_visualization_axes_without_mappings() {
    let fixture = unmapped_dataset(vec![
        ColumnMapping::numeric("grade"),
        ColumnMapping::numeric("x"),
        ColumnMapping::numeric("y"),
        ColumnMapping::numeric("z"),
    ]);
    let response = fixture
        .manager
        .fetch_and_compute(&request(&fixture, Some(BoundingBox::new_2d(0.5, 2.5, 0.5, 2.5))))
        .unwrap();

    assert_eq!(response.total_count, 2);

    let grade = &response.histograms["grade"];
    assert_eq!(grade.bin_counts.iter().sum::<u64>(), 2);
    assert_eq!(response.histograms["z"].bin_counts.iter().sum::<u64>(), 2);

    let grade_box = response
        .box_plots
        .iter()
        .find(|b| b.column_name == "grade")
        .unwrap();
    assert_eq!(grade_box.min, 101.0);
    assert_eq!(grade_box.max, 102.0);
    assert!(response.heatmap.is_some());
}

#[test]
fn test_unmapped_axis_falls_back_to_visualization_column() {
    // Only y is mapped; x comes from the first visualization column
    let fixture = unmapped_dataset(vec![
        ColumnMapping::numeric("grade"),
        ColumnMapping::numeric("x"),
        ColumnMapping::coordinate("y", "y"),
        ColumnMapping::numeric("z"),
    ]);
    let response = fixture
        .manager
        .fetch_and_compute(&request(&fixture, Some(BoundingBox::new_2d(0.5, 2.5, 0.5, 2.5))))
        .unwrap();

    assert_eq!(response.total_count, 2);
    assert_eq!(response.histograms["grade"].bin_counts.iter().sum::<u64>(), 2);
}

#[test]
fn test_box_outside_data_is_empty_not_error() {
    let fixture = four_point_dataset();
    let bbox = BoundingBox::new_2d(100.0, 200.0, 100.0, 200.0);
    let response = fixture
        .manager
        .fetch_and_compute(&request(&fixture, Some(bbox)))
        .unwrap();

    assert!(response.is_empty());
    assert!(response.data_boundaries.is_empty());
    assert!(response.histograms.is_empty());
    assert!(response.heatmap.is_none());
}

#[test]
fn test_statistics_cover_numeric_columns() {
    let fixture = four_point_dataset();
    let response = fixture.manager.fetch_and_compute(&request(&fixture, None)).unwrap();

    let names: Vec<&str> = response.histograms.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["x", "y", "z"]);
    assert_eq!(response.box_plots.len(), 3);
    assert_eq!(response.histograms["x"].num_bins, 30);

    let heatmap = response.heatmap.unwrap();
    assert_eq!(heatmap.x_column, "x");
    assert_eq!(heatmap.value_column, "z");
    assert_eq!(heatmap.cells.iter().map(|c| c.count).sum::<u64>(), 4);
}

#[test]
fn test_no_numeric_columns_skips_statistics() {
    let dir = TempDir::new().unwrap();
    let manager = DataManager::open(dir.path().join("cat.db"), DataManagerConfig::default()).unwrap();
    let mappings = vec![ColumnMapping::categorical("rock")];
    let rows: Vec<Vec<CellValue>> = vec![vec!["granite".into()], vec!["basalt".into()]];
    manager.store().import_table("data_cat", &mappings, &rows).unwrap();
    let dataset = manager.store().register_dataset("data_cat", 2, mappings).unwrap();

    let response = manager
        .fetch_and_compute(&DatasetDataRequest {
            dataset_id: dataset.id,
            columns: columns(&["rock"]),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(response.total_count, 2);
    assert!(response.data_boundaries.is_empty());
    assert!(response.histograms.is_empty());
    assert!(response.box_plots.is_empty());
}

#[test]
fn test_unknown_dataset() {
    let fixture = four_point_dataset();
    let err = fixture
        .manager
        .fetch_and_compute(&DatasetDataRequest {
            dataset_id: "does-not-exist".to_string(),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, ExplorerError::DatasetNotFound { .. }));
    assert!(err.is_not_found());
}

#[test]
fn test_missing_column_is_store_error() {
    let fixture = four_point_dataset();
    let mut req = request(&fixture, None);
    req.columns = columns(&["x", "depth"]);
    let err = fixture.manager.fetch_and_compute(&req).unwrap_err();
    assert_eq!(err.kind(), "store");
}

#[test]
fn test_table_page_and_boundaries() {
    let fixture = four_point_dataset();

    let page = fixture
        .manager
        .table_page(&TablePageRequest {
            dataset_id: fixture.dataset_id.clone(),
            columns: vec![],
            limit: 2,
            offset: 2,
        })
        .unwrap();
    assert_eq!(page.column_names, columns(&["x", "y", "z"]));
    assert_eq!(page.rows, vec![vec![2.0, 2.0, 30.0], vec![3.0, 3.0, 40.0]]);
    assert_eq!(page.total_rows, 4);

    assert!(fixture.manager.boundaries(&fixture.dataset_id).unwrap().is_empty());
    let stats = fixture.manager.refresh_statistics(&fixture.dataset_id).unwrap();
    assert_eq!(stats.len(), 4);

    let boundaries = fixture.manager.boundaries(&fixture.dataset_id).unwrap();
    let names: Vec<&str> = boundaries.iter().map(|b| b.column_name.as_str()).collect();
    assert_eq!(names, vec!["x", "y", "z"]);
    assert_eq!(boundaries[2].max_value, 40.0);
}

#[test]
fn test_filtered_boundaries_do_not_touch_index() {
    let fixture = four_point_dataset();
    fixture.manager.refresh_statistics(&fixture.dataset_id).unwrap();

    let bbox = BoundingBox::new_2d(0.5, 2.5, 0.5, 2.5);
    fixture
        .manager
        .fetch_and_compute(&request(&fixture, Some(bbox)))
        .unwrap();

    let stored = fixture.manager.store().boundaries(&fixture.dataset_id).unwrap();
    assert_eq!(stored["z"].min_value, 10.0);
    assert_eq!(stored["z"].valid_count, 4);
}

#[test]
fn test_delete_dataset_removes_everything() {
    let fixture = four_point_dataset();
    fixture.manager.refresh_statistics(&fixture.dataset_id).unwrap();

    assert!(fixture.manager.store().delete_dataset(&fixture.dataset_id).unwrap());
    assert!(fixture.manager.store().boundaries(&fixture.dataset_id).unwrap().is_empty());
    let err = fixture.manager.boundaries(&fixture.dataset_id).unwrap_err();
    assert!(err.is_not_found());
}
