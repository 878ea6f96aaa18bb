// Real symmetric spherical harmonics for per-shell observation matrices, in
// the MRtrix legacy convention: even orders only, with Im(Y_l^|m|) for m < 0,
// Y_l^0 for m = 0 and Re(Y_l^m) for m > 0, no sqrt(2) factor on the
// off-centre terms.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// highest spherical harmonics order assigned to a shell
pub const MAX_SH_ORDER: usize = 14;

/// converts a cartesian vector to (r, theta, phi) where theta is the polar
/// angle from the +z axis and phi the azimuth from the +x axis
pub fn cart2sphere(v: &[f64; 3]) -> (f64, f64, f64) {
    let r = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    let theta = if r > 0.0 {
        (v[2] / r).clamp(-1.0, 1.0).acos()
    } else {
        0.0
    };
    let phi = v[1].atan2(v[0]);
    (r, theta, phi)
}

/// number of coefficients in a real symmetric basis of the given even order
pub fn sh_coefficient_count(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

/// associated Legendre polynomial P_l^m(x) with Condon-Shortley phase,
/// via the standard (l - m) P_l^m = x (2l - 1) P_{l-1}^m - (l + m - 1) P_{l-2}^m
/// recurrence seeded at P_m^m
fn legendre_p(l: usize, m: usize, x: f64) -> f64 {
    debug_assert!(m <= l, "require m <= l");
    let somx2 = ((1.0 - x) * (1.0 + x)).sqrt();
    let mut pmm = 1.0;
    let mut fact = 1.0;
    for _ in 0..m {
        pmm *= -fact * somx2;
        fact += 2.0;
    }
    if l == m {
        return pmm;
    }
    let mut pmmp1 = x * (2.0 * m as f64 + 1.0) * pmm;
    if l == m + 1 {
        return pmmp1;
    }
    let mut pll = 0.0;
    for ll in (m + 2)..=l {
        pll = (x * (2 * ll - 1) as f64 * pmmp1 - (ll + m - 1) as f64 * pmm) / (ll - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }
    pll
}

/// sqrt((2l + 1) / 4pi * (l - m)! / (l + m)!)
fn sh_normalization(l: usize, m: usize) -> f64 {
    let mut factorial_ratio = 1.0;
    for k in (l - m + 1)..=(l + m) {
        factorial_ratio /= k as f64;
    }
    ((2 * l + 1) as f64 / (4.0 * PI) * factorial_ratio).sqrt()
}

/// observation matrix of the real symmetric spherical harmonics basis, one row
/// per (theta, phi) sample and one column per basis function. Columns run over
/// even l = 0..=order, m = -l..=l.
pub fn real_sym_sh_basis(order: usize, thetas: &[f64], phis: &[f64]) -> Array2<f64> {
    assert_eq!(thetas.len(), phis.len(), "theta and phi must have the same length");
    assert_eq!(order % 2, 0, "spherical harmonics order must be even");

    let mut basis = Array2::zeros((thetas.len(), sh_coefficient_count(order)));
    for (row, (&theta, &phi)) in thetas.iter().zip(phis).enumerate() {
        let ct = theta.cos();
        let mut col = 0;
        for l in (0..=order).step_by(2) {
            for m in -(l as isize)..=(l as isize) {
                let ma = m.unsigned_abs();
                let value = sh_normalization(l, ma) * legendre_p(l, ma, ct);
                basis[[row, col]] = match m {
                    m if m < 0 => value * (ma as f64 * phi).sin(),
                    0 => value,
                    _ => value * (m as f64 * phi).cos(),
                };
                col += 1;
            }
        }
    }
    basis
}

/// monotone step table assigning a spherical harmonics order to a shell from
/// its b-value: the order grows in steps of 2 at each breakpoint, from 2 below
/// the first breakpoint up to [`MAX_SH_ORDER`] above the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShOrderTable {
    breakpoints: Vec<f64>,
}

impl Default for ShOrderTable {
    fn default() -> Self {
        // b-value cutoffs in s/m^2, roughly 202, 707, 1212, 2525, 3131 and
        // 5354 s/mm^2
        Self::new(vec![
            2.02020202e8,
            7.07070707e8,
            1.21212121e9,
            2.52525253e9,
            3.13131313e9,
            5.35353535e9,
        ])
    }
}

impl ShOrderTable {
    /// table over ascending b-value breakpoints; 2 * (breakpoints + 1) is the
    /// highest order the table can assign
    pub fn new(breakpoints: Vec<f64>) -> Self {
        assert!(
            breakpoints.windows(2).all(|w| w[0] < w[1]),
            "breakpoints must be strictly ascending"
        );
        assert!(
            2 * (breakpoints.len() + 1) <= MAX_SH_ORDER,
            "table would assign orders above {MAX_SH_ORDER}"
        );
        Self { breakpoints }
    }

    /// even order for a shell b-value in s/m^2
    pub fn order_for_bvalue(&self, bvalue: f64) -> usize {
        let step = self
            .breakpoints
            .iter()
            .position(|&cutoff| bvalue < cutoff)
            .unwrap_or(self.breakpoints.len());
        2 * (step + 1)
    }
}
