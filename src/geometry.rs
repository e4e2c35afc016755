//! Spherical geometry on sky positions in degrees.

use nalgebra::Vector2;

use crate::Float;

/// Great-circle distance between two sky positions, all in degrees.
///
/// Uses the Vincenty formula, which stays accurate for both tiny and antipodal separations.
pub(crate) fn angular_separation<F: Float>(ra1: F, dec1: F, ra2: F, dec2: F) -> F {
    let (ra1, dec1, ra2, dec2) = (radians(ra1), radians(dec1), radians(ra2), radians(dec2));
    let dra = ra2 - ra1;
    let (sin_dra, cos_dra) = (dra.sin(), dra.cos());
    let (sin_d1, cos_d1) = (dec1.sin(), dec1.cos());
    let (sin_d2, cos_d2) = (dec2.sin(), dec2.cos());

    let num1 = cos_d2 * sin_dra;
    let num2 = cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dra;
    let denominator = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dra;

    degrees((num1 * num1 + num2 * num2).sqrt().atan2(denominator))
}

fn radians<F: Float>(deg: F) -> F {
    deg * F::pi() / F::from_f64(180.).unwrap()
}

fn degrees<F: Float>(rad: F) -> F {
    rad * F::from_f64(180.).unwrap() / F::pi()
}

/// Cartesian unit vector of a sky position in degrees.
pub(crate) fn unit_vector(ra: f64, dec: f64) -> [f64; 3] {
    let (ra, dec) = (ra.to_radians(), dec.to_radians());
    [dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin()]
}

/// Squared chord length between two unit vectors separated by `angle` degrees.
pub(crate) fn chord_squared(angle: f64) -> f64 {
    let chord = 2. * (angle.to_radians() / 2.).sin();
    chord * chord
}

/// Angle between the directions of two vectors, in degrees within `[0, 180]`.
///
/// A zero vector has no direction; its angle to anything is zero.
pub(crate) fn direction_difference<F: Float>(v1: &Vector2<F>, v2: &Vector2<F>) -> F {
    let zero = F::from_f64(0.).unwrap();
    if v1.norm() == zero || v2.norm() == zero {
        return zero;
    }
    let a1 = v1.y.atan2(v1.x);
    let a2 = v2.y.atan2(v2.x);
    let mut diff = (a1 - a2).abs();
    if diff > F::pi() {
        diff = F::two_pi() - diff;
    }
    degrees(diff)
}
