//! CSI amplitude extraction from raw capture tables.
//!
//! A capture session stores one `csi.csv` with two columns: an integer `id`
//! that orders the samples, and `data`, a JSON-encoded flat array of
//! interleaved real/imaginary components per subcarrier. Only a fixed,
//! known-valid subset of subcarrier indices is retained: two contiguous
//! bands on either side of the spectrum centre, with the guard band
//! excluded. For each valid subcarrier the amplitude is the Euclidean norm
//! of its (real, imaginary) pair.
//!
//! Malformed rows fail the whole table load. Alignment and windowing assume
//! a clean amplitude matrix; there is no per-sample recovery path.

use ndarray::Array2;
use serde::Deserialize;
use std::path::Path;

use crate::error::DatasetError;

// ---------------------------------------------------------------------------
// Valid subcarrier set
// ---------------------------------------------------------------------------

/// Inclusive-exclusive bounds of the two valid subcarrier bands.
///
/// Indices 0..6 and the guard band around the spectrum centre (index 32)
/// carry no usable signal and are excluded.
const LOWER_BAND: std::ops::Range<usize> = 6..32;
const UPPER_BAND: std::ops::Range<usize> = 33..59;

/// Number of valid subcarriers per CSI sample (26 + 26).
pub const NUM_SUBCARRIERS: usize = 52;

/// Minimum decoded payload length for a row to cover the highest valid
/// subcarrier's real component at offset `2 * 58`.
pub const MIN_PAYLOAD_LEN: usize = 2 * 58 + 1;

/// Iterator over the valid subcarrier indices, ascending.
pub fn valid_subcarriers() -> impl Iterator<Item = usize> {
    LOWER_BAND.chain(UPPER_BAND)
}

// ---------------------------------------------------------------------------
// CsiTable
// ---------------------------------------------------------------------------

/// A validated, id-sorted CSI amplitude table for one session.
#[derive(Debug, Clone)]
pub struct CsiTable {
    /// Row ids, ascending. Same length as the amplitude row count.
    pub ids: Vec<i64>,
    /// Amplitude matrix of shape `[num_rows, NUM_SUBCARRIERS]`.
    pub amplitudes: Array2<f32>,
}

impl CsiTable {
    /// Number of CSI samples in the table.
    pub fn num_rows(&self) -> usize {
        self.ids.len()
    }
}

/// Raw CSV row as stored on disk.
#[derive(Debug, Deserialize)]
struct RawRow {
    id: i64,
    data: String,
}

/// Load and preprocess the CSI table at `path`.
///
/// Rows are sorted by `id` ascending before amplitudes are extracted, so
/// downstream windowing always sees a monotone time axis.
///
/// # Errors
///
/// - [`DatasetError::CsvParse`] when the CSV structure itself is broken.
/// - [`DatasetError::MalformedRow`] when a row's `data` payload is not a
///   JSON numeric array or is shorter than [`MIN_PAYLOAD_LEN`]. One bad
///   row fails the whole load.
pub fn load_amplitudes(path: &Path) -> Result<CsiTable, DatasetError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| DatasetError::csv_parse(path, e.to_string()))?;

    let mut rows: Vec<(i64, Vec<f64>)> = Vec::new();
    for record in reader.deserialize::<RawRow>() {
        let row = record.map_err(|e| DatasetError::csv_parse(path, e.to_string()))?;
        let payload: Vec<f64> = serde_json::from_str(&row.data)
            .map_err(|e| DatasetError::malformed_row(path, row.id, e.to_string()))?;
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(DatasetError::malformed_row(
                path,
                row.id,
                format!(
                    "payload has {} components, need at least {MIN_PAYLOAD_LEN}",
                    payload.len()
                ),
            ));
        }
        rows.push((row.id, payload));
    }

    rows.sort_by_key(|(id, _)| *id);

    let mut ids = Vec::with_capacity(rows.len());
    let mut amplitudes = Array2::zeros((rows.len(), NUM_SUBCARRIERS));
    for (r, (id, payload)) in rows.into_iter().enumerate() {
        ids.push(id);
        for (c, sc) in valid_subcarriers().enumerate() {
            // 1-indexed subcarrier convention: real at 2i, imaginary at 2i-1.
            let re = payload[2 * sc];
            let im = payload[2 * sc - 1];
            amplitudes[[r, c]] = ((re * re + im * im) as f32).sqrt();
        }
    }

    Ok(CsiTable { ids, amplitudes })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_csv(rows: &[(i64, String)]) -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("csi.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "id,data").unwrap();
        for (id, data) in rows {
            writeln!(f, "{id},\"{}\"", data.replace('"', "\"\"")).unwrap();
        }
        (tmp, path)
    }

    fn payload_with(values: &[(usize, f64)]) -> String {
        let mut raw = vec![0.0_f64; MIN_PAYLOAD_LEN];
        for &(offset, v) in values {
            raw[offset] = v;
        }
        serde_json::to_string(&raw).unwrap()
    }

    #[test]
    fn valid_subcarrier_count_is_fixed() {
        assert_eq!(valid_subcarriers().count(), NUM_SUBCARRIERS);
        assert_eq!(valid_subcarriers().min(), Some(6));
        assert_eq!(valid_subcarriers().max(), Some(58));
        assert!(!valid_subcarriers().any(|i| i == 32), "guard band must be excluded");
    }

    #[test]
    fn amplitude_is_euclidean_norm() {
        // Subcarrier 6: real at offset 12, imaginary at offset 11.
        let data = payload_with(&[(12, 3.0), (11, 4.0)]);
        let (_tmp, path) = write_csv(&[(0, data)]);

        let table = load_amplitudes(&path).unwrap();
        assert_eq!(table.amplitudes.shape(), &[1, NUM_SUBCARRIERS]);
        assert_abs_diff_eq!(table.amplitudes[[0, 0]], 5.0, epsilon = 1e-6);
    }

    #[test]
    fn amplitudes_are_non_negative() {
        let data = payload_with(&[(12, -3.0), (11, -4.0), (116, -1.0)]);
        let (_tmp, path) = write_csv(&[(0, data)]);

        let table = load_amplitudes(&path).unwrap();
        for &v in table.amplitudes.iter() {
            assert!(v >= 0.0, "amplitude {v} must be non-negative");
        }
    }

    #[test]
    fn rows_are_sorted_by_id() {
        let d = payload_with(&[]);
        let (_tmp, path) = write_csv(&[(30, d.clone()), (10, d.clone()), (20, d)]);

        let table = load_amplitudes(&path).unwrap();
        assert_eq!(table.ids, vec![10, 20, 30]);
        assert_eq!(table.num_rows(), 3);
    }

    #[test]
    fn short_payload_fails_whole_load() {
        let good = payload_with(&[]);
        let short = serde_json::to_string(&vec![0.0_f64; MIN_PAYLOAD_LEN - 1]).unwrap();
        let (_tmp, path) = write_csv(&[(0, good), (1, short)]);

        let err = load_amplitudes(&path).unwrap_err();
        assert!(
            matches!(err, DatasetError::MalformedRow { row_id: 1, .. }),
            "expected MalformedRow for id=1, got {err}"
        );
    }

    #[test]
    fn non_json_payload_fails_whole_load() {
        let (_tmp, path) = write_csv(&[(7, "not json".to_string())]);
        let err = load_amplitudes(&path).unwrap_err();
        assert!(matches!(err, DatasetError::MalformedRow { row_id: 7, .. }));
    }
}
