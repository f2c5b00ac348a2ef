//! Interleaved buffer packing
//!
//! Multi-column results travel as one flat f32 buffer laid out row-major,
//! column-minor: `[c0_r0, c1_r0, .., cK_r0, c0_r1, ..]`. The stride is the
//! number of columns and the position of a column in the request is its offset
//! inside each row.

use geoexplorer_shared::{ExplorerError, ExplorerResult};

/// Interleave equally long columns into one row-major buffer.
///
/// Shorter columns are padded with NaN up to the longest one so that a
/// ragged input never shifts later rows into the wrong column.
pub fn interleave<C: AsRef<[f64]>>(columns: &[C]) -> Vec<f32> {
    let stride = columns.len();
    if stride == 0 {
        return Vec::new();
    }

    let rows = columns.iter().map(|c| c.as_ref().len()).max().unwrap_or(0);
    let mut buffer = vec![f32::NAN; rows * stride];

    for (col_idx, column) in columns.iter().enumerate() {
        for (row_idx, &value) in column.as_ref().iter().enumerate() {
            buffer[row_idx * stride + col_idx] = value as f32;
        }
    }

    buffer
}

/// Strided view of column `index` inside a buffer of `stride` columns.
pub fn column_slice(buffer: &[f32], stride: usize, index: usize) -> impl Iterator<Item = f32> + '_ {
    let (skip, step) = if stride == 0 || index >= stride {
        (buffer.len(), 1)
    } else {
        (index, stride)
    };
    buffer.iter().skip(skip).step_by(step).copied()
}

/// Split a buffer back into its `stride` columns.
pub fn deinterleave(buffer: &[f32], stride: usize) -> Vec<Vec<f32>> {
    if stride == 0 {
        return Vec::new();
    }

    let rows = buffer.len() / stride;
    let mut columns: Vec<Vec<f32>> = (0..stride).map(|_| Vec::with_capacity(rows)).collect();
    for row in buffer.chunks_exact(stride) {
        for (column, &value) in columns.iter_mut().zip(row) {
            column.push(value);
        }
    }
    columns
}

/// Number of complete rows in a buffer of `stride` columns.
#[must_use]
pub fn row_count(buffer_len: usize, stride: usize) -> usize {
    if stride == 0 {
        0
    } else {
        buffer_len / stride
    }
}

/// Serialize to little-endian bytes for the wire.
pub fn to_le_bytes(buffer: &[f32]) -> Vec<u8> {
    #[cfg(target_endian = "little")]
    {
        bytemuck::cast_slice::<f32, u8>(buffer).to_vec()
    }
    #[cfg(target_endian = "big")]
    {
        buffer.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

/// Parse a little-endian f32 payload.
pub fn from_le_bytes(bytes: &[u8]) -> ExplorerResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(ExplorerError::Internal {
            message: format!("payload length {} is not a multiple of 4", bytes.len()),
        });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_row_major() {
        let x = vec![0.0, 1.0, 2.0];
        let y = vec![10.0, 11.0, 12.0];
        let buffer = interleave(&[x, y]);
        assert_eq!(buffer, vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0]);
    }

    #[test]
    fn test_round_trip_recovers_columns() {
        let columns: Vec<Vec<f64>> = (0..4)
            .map(|c| (0..25).map(|r| (r * 10 + c) as f64 * 0.5).collect())
            .collect();

        let buffer = interleave(&columns);
        let recovered = deinterleave(&buffer, columns.len());

        for (original, back) in columns.iter().zip(&recovered) {
            let back: Vec<f64> = back.iter().map(|&v| v as f64).collect();
            assert_eq!(original, &back);
        }
    }

    #[test]
    fn test_column_slice_matches_deinterleave() {
        let buffer = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let second: Vec<f32> = column_slice(&buffer, 3, 1).collect();
        assert_eq!(second, vec![2.0, 5.0]);
        assert_eq!(deinterleave(&buffer, 3)[1], second);
    }

    #[test]
    fn test_zero_stride_is_empty() {
        let buffer = vec![1.0, 2.0];
        assert!(deinterleave(&buffer, 0).is_empty());
        assert_eq!(column_slice(&buffer, 0, 0).count(), 0);
        assert_eq!(column_slice(&buffer, 2, 5).count(), 0);
        assert_eq!(row_count(buffer.len(), 0), 0);
        assert!(interleave::<Vec<f64>>(&[]).is_empty());
    }

    #[test]
    fn test_ragged_columns_are_padded() {
        let buffer = interleave(&[vec![1.0, 2.0], vec![3.0]]);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer[2], 2.0);
        assert!(buffer[3].is_nan());
    }

    #[test]
    fn test_le_bytes() {
        let buffer = vec![1.5f32, -2.0, 0.0];
        let bytes = to_le_bytes(&buffer);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &1.5f32.to_le_bytes());
        assert_eq!(from_le_bytes(&bytes).unwrap(), buffer);
        assert!(from_le_bytes(&bytes[..5]).is_err());
    }
}
