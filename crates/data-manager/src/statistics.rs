//! Histogram, box-plot and heatmap computation
//!
//! Every function here is pure and total: degenerate input (empty, all-NaN,
//! zero variance, a single point) yields `None` or a well-formed result, never
//! a panic. Non-finite values are dropped before any computation.

use std::collections::BTreeMap;

use geoexplorer_shared::{BoxPlotResult, HeatmapCell, HeatmapResult, HistogramResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTOGRAM_BINS: usize = 30;
pub const DEFAULT_HEATMAP_GRID_SIZE: u32 = 50;

/// Tunables for the statistics section of a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    pub histogram_bins: usize,
    pub heatmap_grid_size: u32,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            heatmap_grid_size: DEFAULT_HEATMAP_GRID_SIZE,
        }
    }
}

/// Column names carried into a heatmap result
#[derive(Debug, Clone, Copy)]
pub struct HeatmapAxes<'a> {
    pub x_column: &'a str,
    pub y_column: &'a str,
    pub value_column: &'a str,
}

fn finite_values(values: &[f32]) -> Vec<f64> {
    values
        .iter()
        .map(|&v| v as f64)
        .filter(|v| v.is_finite())
        .collect()
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Percentile of sorted data using linear interpolation between closest ranks.
///
/// `sorted` must be ascending; `p` is clamped to `[0, 100]`. `None` for empty input.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p / 100.0).clamp(0.0, 1.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let fraction = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * fraction)
}

/// Equal-width histogram over `[min, max]` of the finite values.
///
/// The last bin is closed on the right so the maximum lands in it. A
/// constant column is binned over `[v - 0.5, v + 0.5]`.
pub fn compute_histogram(values: &[f32], num_bins: usize) -> Option<HistogramResult> {
    if num_bins == 0 {
        return None;
    }

    let data = finite_values(values);
    if data.is_empty() {
        return None;
    }

    let (min_value, max_value) = min_max(&data);
    let (first_edge, last_edge) = if min_value == max_value {
        (min_value - 0.5, max_value + 0.5)
    } else {
        (min_value, max_value)
    };

    let width = (last_edge - first_edge) / num_bins as f64;
    let mut bin_edges: Vec<f64> = (0..=num_bins)
        .map(|i| first_edge + width * i as f64)
        .collect();
    bin_edges[num_bins] = last_edge;

    let norm = num_bins as f64 / (last_edge - first_edge);
    let mut bin_counts = vec![0u64; num_bins];
    for &value in &data {
        let mut idx = (((value - first_edge) * norm) as usize).min(num_bins - 1);
        // Rounding in the scaled index can disagree with the stored edges.
        if value < bin_edges[idx] && idx > 0 {
            idx -= 1;
        } else if idx + 1 < num_bins && value >= bin_edges[idx + 1] {
            idx += 1;
        }
        bin_counts[idx] += 1;
    }

    let bin_ranges = bin_edges
        .windows(2)
        .map(|edge| format!("{:.2} - {:.2}", edge[0], edge[1]))
        .collect();

    Some(HistogramResult {
        bin_ranges,
        bin_counts,
        bin_edges,
        num_bins,
        min_value,
        max_value,
        total_count: data.len() as u64,
    })
}

/// Quartiles, Tukey fences and outliers of the finite values.
pub fn compute_box_plot(values: &[f32], column_name: &str) -> Option<BoxPlotResult> {
    let data = finite_values(values);
    if data.is_empty() {
        return None;
    }

    let mut sorted = data.clone();
    sorted.sort_by(f64::total_cmp);

    let q1 = percentile(&sorted, 25.0)?;
    let median = percentile(&sorted, 50.0)?;
    let q3 = percentile(&sorted, 75.0)?;
    let iqr = q3 - q1;
    let lower_fence = q1 - 1.5 * iqr;
    let upper_fence = q3 + 1.5 * iqr;

    let outliers: Vec<f64> = data
        .iter()
        .copied()
        .filter(|&v| v < lower_fence || v > upper_fence)
        .collect();

    let inside = sorted
        .iter()
        .copied()
        .filter(|&v| v >= lower_fence && v <= upper_fence);
    let (min, max) = match min_max(&inside.collect::<Vec<_>>()) {
        (lo, hi) if lo <= hi => (lo, hi),
        // Every value is an outlier
        _ => (sorted[0], sorted[sorted.len() - 1]),
    };

    let mean = data.iter().sum::<f64>() / data.len() as f64;

    Some(BoxPlotResult {
        column_name: column_name.to_string(),
        min,
        q1,
        median,
        q3,
        max,
        mean,
        iqr,
        lower_fence,
        upper_fence,
        outliers,
        total_count: data.len() as u64,
    })
}

#[inline]
fn bin_index(coord: f64, min: f64, bin_size: f64, grid_size: u32) -> u32 {
    if bin_size <= 0.0 {
        return 0;
    }
    let idx = ((coord - min) / bin_size).floor();
    idx.clamp(0.0, (grid_size - 1) as f64) as u32
}

/// Sparse `grid_size × grid_size` aggregation of `values` over `(x, y)`.
///
/// Rows where any of the three inputs is non-finite are dropped together.
/// Cells are emitted in `(x_index, y_index)` order.
pub fn compute_heatmap(
    x: &[f32],
    y: &[f32],
    values: &[f32],
    axes: HeatmapAxes<'_>,
    grid_size: u32,
) -> Option<HeatmapResult> {
    if grid_size == 0 {
        return None;
    }

    let rows: Vec<(f64, f64, f64)> = x
        .iter()
        .zip(y)
        .zip(values)
        .map(|((&x, &y), &v)| (x as f64, y as f64, v as f64))
        .filter(|(x, y, v)| x.is_finite() && y.is_finite() && v.is_finite())
        .collect();
    if rows.is_empty() {
        return None;
    }

    let (min_x, max_x, min_y, max_y) = rows.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(lx, hx, ly, hy), &(x, y, _)| (lx.min(x), hx.max(x), ly.min(y), hy.max(y)),
    );

    let x_bin_size = (max_x - min_x) / grid_size as f64;
    let y_bin_size = (max_y - min_y) / grid_size as f64;

    let mut cells: BTreeMap<(u32, u32), (f64, u64)> = BTreeMap::new();
    for &(x, y, value) in &rows {
        let key = (
            bin_index(x, min_x, x_bin_size, grid_size),
            bin_index(y, min_y, y_bin_size, grid_size),
        );
        let cell = cells.entry(key).or_insert((0.0, 0));
        cell.0 += value;
        cell.1 += 1;
    }

    let cells: Vec<HeatmapCell> = cells
        .into_iter()
        .map(|((x_index, y_index), (sum, count))| HeatmapCell {
            x_index,
            y_index,
            avg_value: sum / count as f64,
            count,
        })
        .collect();

    let (min_value, max_value) = cells.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), cell| (lo.min(cell.avg_value), hi.max(cell.avg_value)),
    );

    Some(HeatmapResult {
        cells,
        grid_size_x: grid_size,
        grid_size_y: grid_size,
        min_value,
        max_value,
        x_bin_size,
        y_bin_size,
        min_x,
        max_x,
        min_y,
        max_y,
        x_column: axes.x_column.to_string(),
        y_column: axes.y_column.to_string(),
        value_column: axes.value_column.to_string(),
    })
}

/// Descriptive statistics persisted by the boundary index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericSummary {
    pub count: u64,
    pub mean: f64,
    /// Sample standard deviation, `None` for fewer than two values
    pub std: Option<f64>,
    pub min: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub max: f64,
}

/// Summary over the finite values, `None` when there are none.
pub fn summarize(values: &[f64]) -> Option<NumericSummary> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let std = (count > 1).then(|| {
        let ss: f64 = sorted.iter().map(|v| (v - mean) * (v - mean)).sum();
        (ss / (count - 1) as f64).sqrt()
    });

    Some(NumericSummary {
        count: count as u64,
        mean,
        std,
        min: sorted[0],
        q25: percentile(&sorted, 25.0)?,
        q50: percentile(&sorted, 50.0)?,
        q75: percentile(&sorted, 75.0)?,
        max: sorted[count - 1],
    })
}
