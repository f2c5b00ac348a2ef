//! Reply assembly
//!
//! Combines the visualization fetch (the wire payload) with the statistics
//! fetch (every numeric column) into one [`DatasetDataResponse`].

use std::collections::BTreeMap;

use geoexplorer_shared::{DataBoundary, DatasetDataResponse};
use tracing::debug;

use crate::fetcher::FetchResult;
use crate::packing;
use crate::statistics::{compute_box_plot, compute_heatmap, compute_histogram, HeatmapAxes, StatisticsConfig};

#[derive(Debug, Clone, Default)]
pub struct ResponseAssembler {
    config: StatisticsConfig,
}

impl ResponseAssembler {
    pub fn new(config: StatisticsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StatisticsConfig {
        &self.config
    }

    /// Build the reply. `stats` is `None` when there are no numeric columns.
    pub fn assemble(&self, viz: &FetchResult, stats: Option<&FetchResult>) -> DatasetDataResponse {
        let mut response = DatasetDataResponse {
            binary_data: packing::to_le_bytes(&viz.buffer),
            data_length: viz.buffer.len(),
            total_count: viz.point_count(),
            columns: viz.columns.clone(),
            boundaries_filtered: viz.filtered,
            ..Default::default()
        };

        // Request order, not hash order
        response.data_boundaries = viz
            .columns
            .iter()
            .filter_map(|name| viz.boundaries.get(name).map(|b| DataBoundary::new(name, b)))
            .collect();

        if let Some(stats) = stats.filter(|s| s.stride() > 0) {
            self.add_statistics(&mut response, stats, &viz.columns);
        }

        response
    }

    fn add_statistics(&self, response: &mut DatasetDataResponse, stats: &FetchResult, viz_columns: &[String]) {
        let mut histograms = BTreeMap::new();
        let mut box_plots = Vec::with_capacity(stats.stride());

        for (index, name) in stats.columns.iter().enumerate() {
            let values = stats.column_values(index);
            if let Some(histogram) = compute_histogram(&values, self.config.histogram_bins) {
                histograms.insert(name.clone(), histogram);
            }
            if let Some(box_plot) = compute_box_plot(&values, name) {
                box_plots.push(box_plot);
            }
        }

        response.histograms = histograms;
        response.box_plots = box_plots;
        response.heatmap = self.heatmap(stats, viz_columns);
    }

    /// Heatmap over the first three visualization columns, located by name in
    /// the statistics fetch. Skipped when any of them is absent.
    fn heatmap(&self, stats: &FetchResult, viz_columns: &[String]) -> Option<geoexplorer_shared::HeatmapResult> {
        let [x_name, y_name, value_name, ..] = viz_columns else {
            return None;
        };

        let (Some(xi), Some(yi), Some(vi)) = (
            stats.column_index(x_name),
            stats.column_index(y_name),
            stats.column_index(value_name),
        ) else {
            debug!(
                x = %x_name,
                y = %y_name,
                value = %value_name,
                "Visualization columns not among numeric columns, skipping heatmap"
            );
            return None;
        };

        compute_heatmap(
            &stats.column_values(xi),
            &stats.column_values(yi),
            &stats.column_values(vi),
            HeatmapAxes {
                x_column: x_name,
                y_column: y_name,
                value_column: value_name,
            },
            self.config.heatmap_grid_size,
        )
    }
}
