// Conversions between the three equivalent descriptions of diffusion weighting
// in a pulsed-gradient spin-echo experiment: b-value (s/m^2), q-value (1/m) and
// gradient strength (T/m), given pulse duration delta and pulse separation
// Delta (both in seconds).

use std::f64::consts::PI;

/// proton gyromagnetic ratio in rad s^-1 T^-1
pub const GYROMAGNETIC_RATIO: f64 = 2.675221874e8;

/// diffusion time tau = Delta - delta / 3 in seconds
#[inline]
pub fn diffusion_time(delta: f64, big_delta: f64) -> f64 {
    big_delta - delta / 3.0
}

/// q-value in 1/m from a b-value in s/m^2
pub fn q_from_b(bvalue: f64, delta: f64, big_delta: f64) -> f64 {
    (bvalue / diffusion_time(delta, big_delta)).sqrt() / (2.0 * PI)
}

/// b-value in s/m^2 from a q-value in 1/m
pub fn b_from_q(qvalue: f64, delta: f64, big_delta: f64) -> f64 {
    (2.0 * PI * qvalue).powi(2) * diffusion_time(delta, big_delta)
}

/// q-value in 1/m from a gradient strength in T/m
pub fn q_from_g(gradient_strength: f64, delta: f64) -> f64 {
    gradient_strength * delta * GYROMAGNETIC_RATIO / (2.0 * PI)
}

/// gradient strength in T/m from a q-value in 1/m
pub fn g_from_q(qvalue: f64, delta: f64) -> f64 {
    qvalue * 2.0 * PI / (delta * GYROMAGNETIC_RATIO)
}

/// gradient strength in T/m from a b-value in s/m^2
pub fn g_from_b(bvalue: f64, delta: f64, big_delta: f64) -> f64 {
    g_from_q(q_from_b(bvalue, delta, big_delta), delta)
}

/// b-value in s/m^2 from a gradient strength in T/m
pub fn b_from_g(gradient_strength: f64, delta: f64, big_delta: f64) -> f64 {
    b_from_q(q_from_g(gradient_strength, delta), delta, big_delta)
}

#[cfg(test)]
mod tests {
    use crate::gradient_conversions::{
        b_from_g, b_from_q, diffusion_time, g_from_b, g_from_q, q_from_b, q_from_g,
    };

    // typical human protocol: b = 1000 s/mm^2, delta = 12.9 ms, Delta = 21.8 ms
    const B: f64 = 1e9;
    const DELTA: f64 = 0.0129;
    const BIG_DELTA: f64 = 0.0218;

    fn assert_rel_eq(a: f64, b: f64, rel_tol: f64) {
        let scale = a.abs().max(b.abs()).max(f64::MIN_POSITIVE);
        assert!(
            (a - b).abs() / scale < rel_tol,
            "{a} and {b} differ by more than {rel_tol} relative"
        );
    }

    #[test]
    fn b_q_round_trip() {
        let q = q_from_b(B, DELTA, BIG_DELTA);
        assert_rel_eq(b_from_q(q, DELTA, BIG_DELTA), B, 1e-6);
    }

    #[test]
    fn b_g_round_trip() {
        let g = g_from_b(B, DELTA, BIG_DELTA);
        assert_rel_eq(b_from_g(g, DELTA, BIG_DELTA), B, 1e-6);
    }

    #[test]
    fn q_g_round_trip() {
        let q = q_from_b(B, DELTA, BIG_DELTA);
        let g = g_from_q(q, DELTA);
        assert_rel_eq(q_from_g(g, DELTA), q, 1e-6);
    }

    #[test]
    fn round_trips_across_scales() {
        for exp in 6..11 {
            let b = 10f64.powi(exp);
            let q = q_from_b(b, DELTA, BIG_DELTA);
            let g = g_from_b(b, DELTA, BIG_DELTA);
            assert_rel_eq(b_from_q(q, DELTA, BIG_DELTA), b, 1e-6);
            assert_rel_eq(b_from_g(g, DELTA, BIG_DELTA), b, 1e-6);
        }
    }

    #[test]
    fn zero_weighting_maps_to_zero() {
        assert_eq!(q_from_b(0.0, DELTA, BIG_DELTA), 0.0);
        assert_eq!(g_from_b(0.0, DELTA, BIG_DELTA), 0.0);
        assert_eq!(b_from_g(0.0, DELTA, BIG_DELTA), 0.0);
    }

    #[test]
    fn known_magnitudes() {
        // q = sqrt(b / tau) / 2pi, tau = 21.8 - 12.9 / 3 ms = 17.5 ms
        assert_rel_eq(diffusion_time(DELTA, BIG_DELTA), 0.0175, 1e-9);
        let q = q_from_b(B, DELTA, BIG_DELTA);
        assert_rel_eq(q, (B / 0.0175).sqrt() / (2.0 * std::f64::consts::PI), 1e-12);
        // a 1000 s/mm^2 human scan sits around 70 mT/m
        let g = g_from_b(B, DELTA, BIG_DELTA);
        assert!(g > 0.05 && g < 0.09, "implausible gradient strength {g} T/m");
    }

    #[test]
    fn nan_propagates() {
        assert!(q_from_b(f64::NAN, DELTA, BIG_DELTA).is_nan());
        assert!(b_from_g(f64::NAN, DELTA, BIG_DELTA).is_nan());
    }
}
