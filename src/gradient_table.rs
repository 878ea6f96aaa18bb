// External gradient-table representation and its adapters. The table carries
// b-values in s/mm^2 (the scale bval files and most scanner exports use)
// while the scheme itself works in SI s/m^2, so conversion scales by 1e6.

use crate::scheme::{AcquisitionScheme, SchemeOptions};
use crate::SchemeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// scale between the table's s/mm^2 b-values and the scheme's s/m^2
const BVALUE_SCALE: f64 = 1e6;

/// gradient table as exchanged with external tooling: b-values in s/mm^2,
/// direction unit vectors and the two pulse-duration fields in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientTable {
    /// b-values in s/mm^2
    pub bvals: Vec<f64>,
    /// gradient direction unit vectors
    pub bvecs: Vec<[f64; 3]>,
    /// pulse duration per measurement, seconds
    pub small_delta: Vec<f64>,
    /// pulse separation per measurement, seconds
    pub big_delta: Vec<f64>,
}

impl GradientTable {
    /// builds a table from b-value and b-vector text files with uniform pulse
    /// timing
    pub fn from_bvals_bvecs_files(
        bvals_file: impl AsRef<Path>,
        bvecs_file: impl AsRef<Path>,
        small_delta: f64,
        big_delta: f64,
    ) -> Result<Self, SchemeError> {
        let bvals = read_bvals(bvals_file)?;
        let bvecs = read_bvecs(bvecs_file)?;
        let n = bvals.len();
        Ok(Self {
            bvals,
            bvecs,
            small_delta: vec![small_delta; n],
            big_delta: vec![big_delta; n],
        })
    }

    fn check_shape(&self) -> Result<(), SchemeError> {
        let n = self.bvals.len();
        if self.bvecs.len() != n || self.small_delta.len() != n || self.big_delta.len() != n {
            return Err(SchemeError::UnsupportedInputType(format!(
                "gradient table fields must have one entry per measurement; \
                 got {} bvals, {} bvecs, {} small_delta and {} big_delta",
                n,
                self.bvecs.len(),
                self.small_delta.len(),
                self.big_delta.len()
            )));
        }
        Ok(())
    }
}

impl AcquisitionScheme {
    /// builds a scheme from an external gradient table. Shape mismatches in
    /// the table fail with [`SchemeError::UnsupportedInputType`] before the
    /// scheme validator runs.
    pub fn from_gradient_table(
        table: &GradientTable,
        options: SchemeOptions,
    ) -> Result<Self, SchemeError> {
        table.check_shape()?;
        let bvalues: Vec<f64> = table.bvals.iter().map(|&b| b * BVALUE_SCALE).collect();
        Self::from_bvalues(
            &bvalues,
            &table.bvecs,
            &table.small_delta,
            &table.big_delta,
            options,
        )
    }

    /// exports the scheme to the external gradient-table representation
    pub fn to_gradient_table(&self) -> GradientTable {
        GradientTable {
            bvals: self.bvalues.iter().map(|&b| b / BVALUE_SCALE).collect(),
            bvecs: self.gradient_directions.clone(),
            small_delta: self.delta.clone(),
            big_delta: self.big_delta.clone(),
        }
    }
}

/// reads a whitespace-delimited b-value text table (s/mm^2)
pub fn read_bvals(file: impl AsRef<Path>) -> Result<Vec<f64>, SchemeError> {
    let text = fs::read_to_string(file)?;
    text.split_ascii_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                SchemeError::UnsupportedInputType(format!(
                    "invalid b-value entry {token:?} in bvals table"
                ))
            })
        })
        .collect()
}

/// reads a whitespace-delimited b-vector text table. Accepts both the
/// 3-rows-by-N layout bvec files use and a plain N-rows-of-3 layout; a 3-by-3
/// table is taken as three row vectors.
pub fn read_bvecs(file: impl AsRef<Path>) -> Result<Vec<[f64; 3]>, SchemeError> {
    let text = fs::read_to_string(file)?;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_ascii_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|_| {
                    SchemeError::UnsupportedInputType(format!(
                        "invalid b-vector entry {token:?} in bvecs table"
                    ))
                })
            })
            .collect::<Result<Vec<f64>, SchemeError>>()?;
        rows.push(row);
    }

    let row_length = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != row_length) {
        return Err(SchemeError::UnsupportedInputType(
            "bvecs table rows have unequal lengths".to_string(),
        ));
    }

    if row_length == 3 {
        Ok(rows.iter().map(|row| [row[0], row[1], row[2]]).collect())
    } else if rows.len() == 3 {
        Ok((0..row_length)
            .map(|column| [rows[0][column], rows[1][column], rows[2][column]])
            .collect())
    } else {
        Err(SchemeError::UnsupportedInputType(format!(
            "bvecs table must be 3 rows by N columns or N rows of 3; \
             got {} rows of {}",
            rows.len(),
            row_length
        )))
    }
}

#[cfg(test)]
mod tests {
    use crate::gradient_table::{read_bvals, read_bvecs, GradientTable};
    use crate::scheme::{AcquisitionScheme, SchemeOptions};
    use crate::SchemeError;
    use std::io::Write;

    fn example_scheme() -> AcquisitionScheme {
        let bvalues = [0.0, 1.0e9, 1.0e9, 2.5e9];
        let directions = [
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.577350, 0.577350, 0.577350],
        ];
        AcquisitionScheme::from_bvalues(
            &bvalues,
            &directions,
            0.0129,
            0.0218,
            SchemeOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn export_import_round_trip() {
        let scheme = example_scheme();
        let table = scheme.to_gradient_table();
        assert_eq!(table.bvals, vec![0.0, 1000.0, 1000.0, 2500.0]);

        let back = AcquisitionScheme::from_gradient_table(&table, SchemeOptions::default())
            .unwrap();
        for m in 0..scheme.number_of_measurements() {
            let scale = scheme.bvalues[m].max(1.0);
            assert!((back.bvalues[m] - scheme.bvalues[m]).abs() / scale < 1e-3);
            assert_eq!(back.gradient_directions[m], scheme.gradient_directions[m]);
            assert_eq!(back.delta[m], scheme.delta[m]);
            assert_eq!(back.big_delta[m], scheme.big_delta[m]);
        }
        assert_eq!(back.shell_indices, scheme.shell_indices);
    }

    #[test]
    fn mismatched_table_fields_are_rejected() {
        let mut table = example_scheme().to_gradient_table();
        table.bvecs.pop();
        let err =
            AcquisitionScheme::from_gradient_table(&table, SchemeOptions::default()).unwrap_err();
        match err {
            SchemeError::UnsupportedInputType(msg) => {
                assert!(msg.contains("one entry per measurement"))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn invalid_directions_surface_as_acquisition_errors() {
        let mut table = example_scheme().to_gradient_table();
        table.bvecs[1] = [2.0, 0.0, 0.0];
        let err =
            AcquisitionScheme::from_gradient_table(&table, SchemeOptions::default()).unwrap_err();
        assert!(matches!(err, SchemeError::InvalidAcquisition(_)));
    }

    #[test]
    fn table_survives_a_serde_round_trip() {
        let table = example_scheme().to_gradient_table();
        let json = serde_json::to_string(&table).unwrap();
        let back: GradientTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn reads_bvals_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 1000 1000\n2500").unwrap();
        let bvals = read_bvals(file.path()).unwrap();
        assert_eq!(bvals, vec![0.0, 1000.0, 1000.0, 2500.0]);
    }

    #[test]
    fn reads_row_major_bvecs_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 0 1").unwrap();
        writeln!(file, "1 0 0").unwrap();
        writeln!(file, "0 1 0").unwrap();
        writeln!(file, "0 0 -1").unwrap();
        let bvecs = read_bvecs(file.path()).unwrap();
        assert_eq!(bvecs.len(), 4);
        assert_eq!(bvecs[0], [0.0, 0.0, 1.0]);
        assert_eq!(bvecs[3], [0.0, 0.0, -1.0]);
    }

    #[test]
    fn reads_fsl_layout_bvecs_table() {
        // 3 rows by N columns: one row per component
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 1 0 0").unwrap();
        writeln!(file, "0 0 1 0").unwrap();
        writeln!(file, "1 0 0 -1").unwrap();
        let bvecs = read_bvecs(file.path()).unwrap();
        assert_eq!(bvecs.len(), 4);
        assert_eq!(bvecs[0], [0.0, 0.0, 1.0]);
        assert_eq!(bvecs[1], [1.0, 0.0, 0.0]);
        assert_eq!(bvecs[3], [0.0, 0.0, -1.0]);
    }

    #[test]
    fn rejects_malformed_bvecs_tables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 1 0 0").unwrap();
        writeln!(file, "0 0 1 0").unwrap();
        let err = read_bvecs(file.path()).unwrap_err();
        assert!(matches!(err, SchemeError::UnsupportedInputType(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 1 x").unwrap();
        let err = read_bvecs(file.path()).unwrap_err();
        match err {
            SchemeError::UnsupportedInputType(msg) => assert!(msg.contains("\"x\"")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn builds_table_from_text_files() {
        let mut bvals_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(bvals_file, "0 1000 1000 2500").unwrap();
        let mut bvecs_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(bvecs_file, "0 1 0 0.577350").unwrap();
        writeln!(bvecs_file, "0 0 1 0.577350").unwrap();
        writeln!(bvecs_file, "1 0 0 0.577350").unwrap();

        let table = GradientTable::from_bvals_bvecs_files(
            bvals_file.path(),
            bvecs_file.path(),
            0.0129,
            0.0218,
        )
        .unwrap();
        assert_eq!(table.bvals.len(), 4);
        assert_eq!(table.small_delta, vec![0.0129; 4]);

        let scheme =
            AcquisitionScheme::from_gradient_table(&table, SchemeOptions::default()).unwrap();
        assert_eq!(scheme.number_of_b0s(), 1);
        assert_eq!(scheme.number_of_shells(), 3);
    }
}
