// Acquisition scheme construction: validates the raw per-measurement arrays,
// derives the missing physical representations, partitions measurements into
// shells per unique pulse-timing pair and precomputes each diffusion-weighted
// shell's spherical harmonics observation matrix.

use crate::gradient_conversions::{
    b_from_g, b_from_q, diffusion_time, g_from_b, g_from_q, q_from_b, q_from_g,
};
use crate::sh::{cart2sphere, real_sym_sh_basis, ShOrderTable};
use crate::shells::{classify_shells, DEFAULT_MIN_B_SHELL_DISTANCE};
use crate::SchemeError;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// default b-value below which a measurement counts as a b0, in s/m^2
pub const DEFAULT_B0_THRESHOLD: f64 = 10e6;

/// gradient directions may deviate from unit norm by strictly less than this
const UNIT_NORM_TOLERANCE: f64 = 1e-3;

/// tuning knobs for scheme construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeOptions {
    /// minimum b-value distance between separate shells, s/m^2
    pub min_b_shell_distance: f64,
    /// b-value at or below which a measurement counts as a b0, s/m^2
    pub b0_threshold: f64,
    /// step table assigning spherical harmonics orders to shell b-values
    pub sh_order_table: ShOrderTable,
}

impl Default for SchemeOptions {
    fn default() -> Self {
        Self {
            min_b_shell_distance: DEFAULT_MIN_B_SHELL_DISTANCE,
            b0_threshold: DEFAULT_B0_THRESHOLD,
            sh_order_table: ShOrderTable::default(),
        }
    }
}

/// pulse duration or separation, either one value for the whole acquisition or
/// one value per measurement
#[derive(Debug, Clone, Copy)]
pub enum PulseTiming<'a> {
    Uniform(f64),
    PerMeasurement(&'a [f64]),
}

impl From<f64> for PulseTiming<'_> {
    fn from(seconds: f64) -> Self {
        Self::Uniform(seconds)
    }
}

impl<'a> From<&'a [f64]> for PulseTiming<'a> {
    fn from(seconds: &'a [f64]) -> Self {
        Self::PerMeasurement(seconds)
    }
}

impl<'a> From<&'a Vec<f64>> for PulseTiming<'a> {
    fn from(seconds: &'a Vec<f64>) -> Self {
        Self::PerMeasurement(seconds)
    }
}

impl PulseTiming<'_> {
    /// per-measurement timing vector for n measurements
    fn broadcast(self, n: usize) -> Vec<f64> {
        match self {
            Self::Uniform(seconds) => vec![seconds; n],
            Self::PerMeasurement(seconds) => seconds.to_vec(),
        }
    }
}

/// one group of measurements sharing pulse timing whose b-values cluster
/// within the shell distance
#[derive(Debug, Clone)]
pub struct Shell {
    /// mean b-value of the cluster, s/m^2
    pub bvalue: f64,
    /// q-value of the shell's first measurement, 1/m
    pub qvalue: f64,
    /// gradient strength of the shell's first measurement, T/m
    pub gradient_strength: f64,
    /// pulse duration, seconds
    pub delta: f64,
    /// pulse separation, seconds
    pub big_delta: f64,
    /// whether the shell sits at or below the b0 threshold
    pub is_b0: bool,
    /// spherical harmonics order, present for diffusion-weighted shells
    pub sh_order: Option<usize>,
    /// observation matrix mapping spherical harmonics coefficients to this
    /// shell's gradient directions, present for diffusion-weighted shells
    pub sh_matrix: Option<Array2<f64>>,
}

/// everything needed to simulate and fit microstructure models on one
/// acquisition: the raw per-measurement arrays, all three diffusion-weighting
/// representations, the shell partition and the per-shell harmonics matrices.
///
/// Built through [`from_bvalues`](AcquisitionScheme::from_bvalues),
/// [`from_qvalues`](AcquisitionScheme::from_qvalues) or
/// [`from_gradient_strengths`](AcquisitionScheme::from_gradient_strengths);
/// the anchor representation is taken as ground truth and the other two are
/// derived from it. Construction either returns a fully populated scheme or
/// fails validation before any derived field is computed.
#[derive(Debug, Clone)]
pub struct AcquisitionScheme {
    /// b-values in s/m^2
    pub bvalues: Vec<f64>,
    /// q-values in 1/m
    pub qvalues: Vec<f64>,
    /// gradient strengths in T/m
    pub gradient_strengths: Vec<f64>,
    /// gradient direction unit vectors
    pub gradient_directions: Vec<[f64; 3]>,
    /// pulse duration per measurement, seconds
    pub delta: Vec<f64>,
    /// pulse separation per measurement, seconds
    pub big_delta: Vec<f64>,
    /// diffusion time Delta - delta / 3 per measurement, seconds
    pub tau: Vec<f64>,
    /// which measurements sit at or below the b0 threshold
    pub b0_mask: Vec<bool>,
    /// shell index per measurement, contiguous from 0
    pub shell_indices: Vec<usize>,
    /// shells in index order
    pub shells: Vec<Shell>,
    /// options the scheme was built with
    pub options: SchemeOptions,
}

impl AcquisitionScheme {
    /// builds a scheme anchored on b-values in s/m^2 (a shell at
    /// 1000 s/mm^2 enters as 1000e6)
    pub fn from_bvalues<'a>(
        bvalues: &[f64],
        gradient_directions: &[[f64; 3]],
        delta: impl Into<PulseTiming<'a>>,
        big_delta: impl Into<PulseTiming<'a>>,
        options: SchemeOptions,
    ) -> Result<Self, SchemeError> {
        let delta = delta.into().broadcast(bvalues.len());
        let big_delta = big_delta.into().broadcast(bvalues.len());
        check_acquisition(bvalues, gradient_directions, &delta, &big_delta)?;
        let qvalues = bvalues
            .iter()
            .zip(delta.iter().zip(&big_delta))
            .map(|(&b, (&d, &bd))| q_from_b(b, d, bd))
            .collect();
        let gradient_strengths = bvalues
            .iter()
            .zip(delta.iter().zip(&big_delta))
            .map(|(&b, (&d, &bd))| g_from_b(b, d, bd))
            .collect();
        Ok(Self::assemble(
            bvalues.to_vec(),
            qvalues,
            gradient_strengths,
            gradient_directions.to_vec(),
            delta,
            big_delta,
            options,
        ))
    }

    /// builds a scheme anchored on q-values in 1/m (a q-value of 10 1/mm
    /// enters as 10e3)
    pub fn from_qvalues<'a>(
        qvalues: &[f64],
        gradient_directions: &[[f64; 3]],
        delta: impl Into<PulseTiming<'a>>,
        big_delta: impl Into<PulseTiming<'a>>,
        options: SchemeOptions,
    ) -> Result<Self, SchemeError> {
        let delta = delta.into().broadcast(qvalues.len());
        let big_delta = big_delta.into().broadcast(qvalues.len());
        check_acquisition(qvalues, gradient_directions, &delta, &big_delta)?;
        let bvalues = qvalues
            .iter()
            .zip(delta.iter().zip(&big_delta))
            .map(|(&q, (&d, &bd))| b_from_q(q, d, bd))
            .collect();
        let gradient_strengths = qvalues
            .iter()
            .zip(&delta)
            .map(|(&q, &d)| g_from_q(q, d))
            .collect();
        Ok(Self::assemble(
            bvalues,
            qvalues.to_vec(),
            gradient_strengths,
            gradient_directions.to_vec(),
            delta,
            big_delta,
            options,
        ))
    }

    /// builds a scheme anchored on gradient strengths in T/m (300 mT/m enters
    /// as 0.3)
    pub fn from_gradient_strengths<'a>(
        gradient_strengths: &[f64],
        gradient_directions: &[[f64; 3]],
        delta: impl Into<PulseTiming<'a>>,
        big_delta: impl Into<PulseTiming<'a>>,
        options: SchemeOptions,
    ) -> Result<Self, SchemeError> {
        let delta = delta.into().broadcast(gradient_strengths.len());
        let big_delta = big_delta.into().broadcast(gradient_strengths.len());
        check_acquisition(gradient_strengths, gradient_directions, &delta, &big_delta)?;
        let bvalues = gradient_strengths
            .iter()
            .zip(delta.iter().zip(&big_delta))
            .map(|(&g, (&d, &bd))| b_from_g(g, d, bd))
            .collect();
        let qvalues = gradient_strengths
            .iter()
            .zip(&delta)
            .map(|(&g, &d)| q_from_g(g, d))
            .collect();
        Ok(Self::assemble(
            bvalues,
            qvalues,
            gradient_strengths.to_vec(),
            gradient_directions.to_vec(),
            delta,
            big_delta,
            options,
        ))
    }

    // inputs are validated at this point; everything below is derivation
    fn assemble(
        bvalues: Vec<f64>,
        qvalues: Vec<f64>,
        gradient_strengths: Vec<f64>,
        gradient_directions: Vec<[f64; 3]>,
        delta: Vec<f64>,
        big_delta: Vec<f64>,
        options: SchemeOptions,
    ) -> Self {
        let n = bvalues.len();
        let tau = delta
            .iter()
            .zip(&big_delta)
            .map(|(&d, &bd)| diffusion_time(d, bd))
            .collect();
        let b0_mask: Vec<bool> = bvalues.iter().map(|&b| b <= options.b0_threshold).collect();
        if !b0_mask.iter().any(|&is_b0| is_b0) {
            log::warn!(
                "no b0 measurements were detected; check that the b0 threshold \
                 ({} s/m^2) is high enough and that the acquisition design is correct",
                options.b0_threshold
            );
        }

        let (shell_indices, shell_bvalues) = match n {
            0 => (Vec::new(), Vec::new()),
            // degenerate single-measurement input: one shell, classified
            // directly against the b0 threshold, no clustering involved
            1 => (vec![0], bvalues.clone()),
            _ => partition_into_shells(&bvalues, &delta, &big_delta, options.min_b_shell_distance),
        };

        // representative q/G/delta/Delta come from each shell's first
        // measurement; b-values within a shell are only approximately equal
        let n_shells = shell_bvalues.len();
        let mut first_member = vec![usize::MAX; n_shells];
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_shells];
        for (measurement, &shell) in shell_indices.iter().enumerate() {
            if first_member[shell] == usize::MAX {
                first_member[shell] = measurement;
            }
            members[shell].push(measurement);
        }

        let shells = (0..n_shells)
            .into_par_iter()
            .map(|shell| {
                let first = first_member[shell];
                let is_b0 = shell_bvalues[shell] <= options.b0_threshold;
                let (sh_order, sh_matrix) = if is_b0 {
                    (None, None)
                } else {
                    let order = options.sh_order_table.order_for_bvalue(shell_bvalues[shell]);
                    let (thetas, phis): (Vec<f64>, Vec<f64>) = members[shell]
                        .iter()
                        .map(|&m| {
                            let (_, theta, phi) = cart2sphere(&gradient_directions[m]);
                            (theta, phi)
                        })
                        .unzip();
                    (Some(order), Some(real_sym_sh_basis(order, &thetas, &phis)))
                };
                Shell {
                    bvalue: shell_bvalues[shell],
                    qvalue: qvalues[first],
                    gradient_strength: gradient_strengths[first],
                    delta: delta[first],
                    big_delta: big_delta[first],
                    is_b0,
                    sh_order,
                    sh_matrix,
                }
            })
            .collect();

        Self {
            bvalues,
            qvalues,
            gradient_strengths,
            gradient_directions,
            delta,
            big_delta,
            tau,
            b0_mask,
            shell_indices,
            shells,
            options,
        }
    }

    pub fn number_of_measurements(&self) -> usize {
        self.bvalues.len()
    }

    pub fn number_of_b0s(&self) -> usize {
        self.b0_mask.iter().filter(|&&is_b0| is_b0).count()
    }

    pub fn number_of_shells(&self) -> usize {
        self.shells.len()
    }

    /// shells carrying actual diffusion weighting
    pub fn number_of_dwi_shells(&self) -> usize {
        self.shells.iter().filter(|shell| !shell.is_b0).count()
    }

    /// human-readable shell table; useful to check that the shells separated
    /// as intended and that the inputs were given in the right unit scale
    pub fn summary(&self) -> String {
        let mut out = String::new();
        writeln!(out, "Acquisition scheme summary\n").unwrap();
        writeln!(out, "total number of measurements: {}", self.number_of_measurements()).unwrap();
        writeln!(out, "number of b0 measurements: {}", self.number_of_b0s()).unwrap();
        writeln!(out, "number of DWI shells: {}\n", self.number_of_dwi_shells()).unwrap();
        writeln!(
            out,
            "shell_index |# of DWIs |bvalue [s/mm^2] |gradient strength [mT/m] |delta [ms] |Delta[ms]"
        )
        .unwrap();
        for (index, shell) in self.shells.iter().enumerate() {
            let count = self.shell_indices.iter().filter(|&&s| s == index).count();
            writeln!(
                out,
                "{: <12}|{: <10}|{: <16}|{: <25}|{: <11}|{: <5}",
                index,
                count,
                (shell.bvalue / 1e6).round() as i64,
                (shell.gradient_strength * 1e3).round() as i64,
                shell.delta * 1e3,
                shell.big_delta * 1e3,
            )
            .unwrap();
        }
        out
    }

    pub fn print_summary(&self) {
        println!("{}", self.summary());
    }
}

/// groups measurements by exact (delta, Delta) pair in order of first
/// appearance and folds the shell classifier over the groups, offsetting each
/// group's local shell indices by the number of shells already assigned.
/// Grouping by timing first keeps shells apart that happen to share a b-value
/// through different timing combinations.
fn partition_into_shells(
    bvalues: &[f64],
    delta: &[f64],
    big_delta: &[f64],
    min_b_shell_distance: f64,
) -> (Vec<usize>, Vec<f64>) {
    let mut groups: Vec<(f64, f64)> = Vec::new();
    for (&d, &bd) in delta.iter().zip(big_delta) {
        if !groups.contains(&(d, bd)) {
            groups.push((d, bd));
        }
    }

    let mut shell_indices = vec![0usize; bvalues.len()];
    let mut shell_bvalues = Vec::new();
    for (d, bd) in groups {
        let group_members: Vec<usize> = (0..bvalues.len())
            .filter(|&m| delta[m] == d && big_delta[m] == bd)
            .collect();
        let group_bvalues: Vec<f64> = group_members.iter().map(|&m| bvalues[m]).collect();
        let (local_indices, local_bvalues) =
            classify_shells(&group_bvalues, min_b_shell_distance);
        let offset = shell_bvalues.len();
        for (&measurement, &local) in group_members.iter().zip(&local_indices) {
            shell_indices[measurement] = offset + local;
        }
        shell_bvalues.extend(local_bvalues);
    }
    (shell_indices, shell_bvalues)
}

/// fixed-order validity checks on the raw acquisition arrays. The first
/// failing check is reported; on success no state has been touched.
fn check_acquisition(
    values: &[f64],
    gradient_directions: &[[f64; 3]],
    delta: &[f64],
    big_delta: &[f64],
) -> Result<(), SchemeError> {
    if values.len() != gradient_directions.len() {
        return Err(SchemeError::InvalidAcquisition(format!(
            "b/q/G input and gradient_directions must have the same length; \
             currently their lengths are {} and {}",
            values.len(),
            gradient_directions.len()
        )));
    }
    if values.len() != delta.len() || values.len() != big_delta.len() {
        return Err(SchemeError::InvalidAcquisition(format!(
            "b/q/G input, delta and Delta must have the same length; \
             currently their lengths are {}, {} and {}",
            values.len(),
            delta.len(),
            big_delta.len()
        )));
    }
    let min_delta = delta.iter().copied().fold(f64::INFINITY, f64::min);
    let min_big_delta = big_delta.iter().copied().fold(f64::INFINITY, f64::min);
    if min_delta < 0.0 || min_big_delta < 0.0 {
        return Err(SchemeError::InvalidAcquisition(format!(
            "delta and Delta must be zero or positive; \
             currently their minimum values are {min_delta} and {min_big_delta}"
        )));
    }
    let min_value = values.iter().copied().fold(f64::INFINITY, f64::min);
    if min_value < 0.0 {
        return Err(SchemeError::InvalidAcquisition(format!(
            "b/q/G input must be zero or positive; minimum value found is {min_value}"
        )));
    }
    for (row, direction) in gradient_directions.iter().enumerate() {
        let norm =
            (direction[0].powi(2) + direction[1].powi(2) + direction[2].powi(2)).sqrt();
        if !((norm - 1.0).abs() < UNIT_NORM_TOLERANCE) {
            return Err(SchemeError::InvalidAcquisition(format!(
                "gradient directions must be unit vectors; \
                 row {row} has norm {norm}"
            )));
        }
    }
    Ok(())
}
