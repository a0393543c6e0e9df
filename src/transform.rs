//! Shift transforms between the lab frame and a co-moving frame.
//!
//! A transform owns one motion hypothesis: a time-indexed displacement per
//! spatial dimension. [`ShiftTransform::apply`] maps a field from co-moving
//! to lab coordinates by resampling each time slice at `position - shift(t)`;
//! [`ShiftTransform::reverse`] resamples at `position + shift(t)` and brings
//! lab-frame data into the co-moving frame. The two are mutual inverses up to
//! interpolation error, which the transform can report on request.
//!
//! Resampling uses a Lagrange stencil of `order + 1` points. Because the
//! displacement is constant in space within one time slice, the stencil
//! weights are computed once per slice and per dimension; multi-dimensional
//! shifts factor into separable passes along each axis.
//!
//! # What Can Go Wrong
//!
//! 1. **Order too high**: an `order + 1` point stencil needs at least that
//!    many grid points on the axis. Caught at construction.
//! 2. **Mismatched boundary policies**: `apply` and `reverse` share the
//!    transform's single policy, so the round-trip invariant cannot be broken
//!    by configuration.
//! 3. **Non-periodic out-of-range shifts**: with [`Boundary::ZeroPad`], a
//!    displacement at least as large as the domain extent would push every
//!    sample off the grid. Caught at construction instead of clamped.

use crate::{Error, Result};
use ndarray::Array2;

/// Out-of-domain sampling rule shared by `apply` and `reverse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boundary {
    /// Wrap around the domain. Any shift magnitude is representable.
    #[default]
    Periodic,
    /// Treat the field as zero outside the domain.
    ZeroPad,
}

/// Which way a resampling pass moves the data.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Direction {
    /// Co-moving -> lab: sample at `position - shift(t)`.
    Apply,
    /// Lab -> co-moving: sample at `position + shift(t)`.
    Reverse,
}

/// A parametric coordinate map for one co-moving frame.
///
/// Fields are dense matrices of shape (flattened spatial points, time
/// samples); the spatial flattening is row-major over `shape`.
///
/// # Example
///
/// ```rust
/// use ndarray::Array2;
/// use spod::ShiftTransform;
///
/// let nx = 64;
/// let nt = 16;
/// let dx = 1.0 / nx as f64;
/// // Uniform drift: one displacement per time sample.
/// let shifts = Array2::from_shape_fn((1, nt), |(_, t)| 0.3 * t as f64 / nt as f64);
/// let trafo = ShiftTransform::new(&[nx], &[1.0], shifts, &[dx], 3).unwrap();
///
/// let tau = std::f64::consts::TAU;
/// let field = Array2::from_shape_fn((nx, nt), |(i, _)| (i as f64 * dx * tau).sin());
/// let err = trafo.interpolation_error(&field).unwrap();
/// assert!(err < 1e-4);
/// ```
#[derive(Debug, Clone)]
pub struct ShiftTransform {
    shape: Vec<usize>,
    domain: Vec<f64>,
    dx: Vec<f64>,
    /// One displacement per (dimension, time sample), in physical units.
    shifts: Array2<f64>,
    order_apply: usize,
    order_reverse: usize,
    boundary: Boundary,
}

impl ShiftTransform {
    /// Create a periodic transform with the same interpolation order in both
    /// directions.
    ///
    /// # Arguments
    ///
    /// * `shape` - grid points per spatial dimension
    /// * `domain` - physical extent per spatial dimension
    /// * `shifts` - displacements, shape (dimensions, time samples)
    /// * `dx` - grid spacing per spatial dimension
    /// * `interp_order` - Lagrange polynomial degree of the resampling kernel
    pub fn new(
        shape: &[usize],
        domain: &[f64],
        shifts: Array2<f64>,
        dx: &[f64],
        interp_order: usize,
    ) -> Result<Self> {
        Self::with_orders(shape, domain, shifts, dx, interp_order, interp_order)
    }

    /// Same as [`ShiftTransform::new`] but with independent forward
    /// (`apply`) and inverse (`reverse`) interpolation orders.
    pub fn with_orders(
        shape: &[usize],
        domain: &[f64],
        shifts: Array2<f64>,
        dx: &[f64],
        apply_order: usize,
        reverse_order: usize,
    ) -> Result<Self> {
        let ndim = shape.len();
        if ndim == 0 {
            return Err(Error::Grid("transform needs at least one spatial dimension"));
        }
        if domain.len() != ndim || dx.len() != ndim {
            return Err(Error::Grid(
                "shape, domain and spacing must have one entry per dimension",
            ));
        }
        if shifts.nrows() != ndim {
            return Err(Error::Grid("shift field needs one row per spatial dimension"));
        }
        if shifts.ncols() == 0 {
            return Err(Error::Grid("shift field needs at least one time sample"));
        }
        if shifts.iter().any(|s| !s.is_finite()) {
            return Err(Error::Grid("shift field must be finite"));
        }
        for d in 0..ndim {
            if shape[d] == 0 {
                return Err(Error::Grid("every axis needs at least one grid point"));
            }
            if dx[d] <= 0.0 || !dx[d].is_finite() || domain[d] <= 0.0 || !domain[d].is_finite() {
                return Err(Error::Grid("domain extents and spacings must be positive"));
            }
            // The periodic grid covers [0, L) in steps of dx, so N * dx == L.
            let covered = shape[d] as f64 * dx[d];
            if (covered - domain[d]).abs() > 1e-9 * domain[d].max(covered) {
                return Err(Error::Grid("grid points times spacing must equal the extent"));
            }
        }
        let transform = Self {
            shape: shape.to_vec(),
            domain: domain.to_vec(),
            dx: dx.to_vec(),
            shifts,
            order_apply: apply_order,
            order_reverse: reverse_order,
            boundary: Boundary::Periodic,
        };
        transform.validate_orders()?;
        Ok(transform)
    }

    /// Replace the boundary policy, re-validating the shift field against it.
    pub fn with_boundary(mut self, boundary: Boundary) -> Result<Self> {
        self.boundary = boundary;
        if let Boundary::ZeroPad = self.boundary {
            for d in 0..self.ndim() {
                for &s in self.shifts.row(d) {
                    if s.abs() >= self.domain[d] {
                        return Err(Error::ShiftOutOfRange(s, self.domain[d]));
                    }
                }
            }
        }
        Ok(self)
    }

    fn validate_orders(&self) -> Result<()> {
        for &order in &[self.order_apply, self.order_reverse] {
            if order == 0 {
                return Err(Error::Grid("interpolation order must be at least 1"));
            }
            for &n in &self.shape {
                if order + 1 > n {
                    return Err(Error::InterpOrderTooLarge(order, order + 1, n));
                }
            }
        }
        Ok(())
    }

    /// Number of spatial dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Grid points per spatial dimension.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total flattened spatial points (rows of a compatible field).
    pub fn points(&self) -> usize {
        self.shape.iter().product()
    }

    /// Time samples (columns of a compatible field).
    pub fn time_samples(&self) -> usize {
        self.shifts.ncols()
    }

    /// Map a co-moving field to lab coordinates.
    ///
    /// Each time slice is resampled at `position - shift(t)`. Returns a new
    /// field of the same shape; the input is never mutated.
    pub fn apply(&self, field: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_field(field)?;
        Ok(self.resample(field, Direction::Apply))
    }

    /// Map a lab-frame field into co-moving coordinates.
    ///
    /// Each time slice is resampled at `position + shift(t)`; the inverse of
    /// [`ShiftTransform::apply`] up to interpolation error.
    pub fn reverse(&self, field: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_field(field)?;
        Ok(self.resample(field, Direction::Reverse))
    }

    /// Relative round-trip discrepancy `‖reverse(apply(f)) - f‖_F / ‖f‖_F`.
    ///
    /// Callers use this to check that the configured interpolation order is
    /// adequate for their data before running a decomposition. Returns 0 for
    /// an identically zero field.
    pub fn interpolation_error(&self, field: &Array2<f64>) -> Result<f64> {
        self.check_field(field)?;
        let norm: f64 = field.iter().map(|&x| x * x).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Ok(0.0);
        }
        let round_trip = self.resample(&self.resample(field, Direction::Apply), Direction::Reverse);
        let diff: f64 = round_trip
            .iter()
            .zip(field.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        Ok(diff / norm)
    }

    fn check_field(&self, field: &Array2<f64>) -> Result<()> {
        if field.nrows() != self.points() || field.ncols() != self.time_samples() {
            return Err(Error::FieldShapeMismatch(
                field.nrows(),
                field.ncols(),
                self.points(),
                self.time_samples(),
            ));
        }
        Ok(())
    }

    /// Resampling core. Shapes are assumed valid; the public entry points and
    /// [`crate::Frame`] guarantee that by construction.
    pub(crate) fn resample(&self, field: &Array2<f64>, direction: Direction) -> Array2<f64> {
        let order = match direction {
            Direction::Apply => self.order_apply,
            Direction::Reverse => self.order_reverse,
        };
        let sign = match direction {
            Direction::Apply => 1.0,
            Direction::Reverse => -1.0,
        };
        let points = self.points();
        let mut out = Array2::zeros(field.raw_dim());
        let mut lane = vec![0.0; points];
        let mut scratch = vec![0.0; self.shape.iter().copied().max().unwrap_or(0)];

        for t in 0..self.time_samples() {
            for (dst, &src) in lane.iter_mut().zip(field.column(t)) {
                *dst = src;
            }
            for d in 0..self.ndim() {
                let delta = sign * self.shifts[[d, t]] / self.dx[d];
                if delta != 0.0 {
                    self.shift_axis(&mut lane, &mut scratch, d, delta, order);
                }
            }
            for (dst, &src) in out.column_mut(t).iter_mut().zip(lane.iter()) {
                *dst = src;
            }
        }
        out
    }

    /// Shift one axis of a row-major flattened slice so that
    /// `out[i] = f(i - delta)` in grid units along that axis.
    fn shift_axis(&self, buf: &mut [f64], scratch: &mut [f64], axis: usize, delta: f64, order: usize) {
        let len = self.shape[axis];
        let stride: usize = self.shape[axis + 1..].iter().product();
        let blocks: usize = self.shape[..axis].iter().product();

        // Sample point i - delta = i + m + frac with m integral, frac in [0, 1).
        let neg = -delta;
        let m = neg.floor();
        let frac = neg - m;
        let m = m as isize;
        let centre = ((order - 1) / 2) as isize;
        let weights = lagrange_weights(order, frac);

        for b in 0..blocks {
            for lane in 0..stride {
                let base = b * len * stride + lane;
                for (i, slot) in scratch[..len].iter_mut().enumerate() {
                    let anchor = i as isize + m - centre;
                    let mut acc = 0.0;
                    for (k, &w) in weights.iter().enumerate() {
                        let idx = anchor + k as isize;
                        match self.boundary {
                            Boundary::Periodic => {
                                let j = idx.rem_euclid(len as isize) as usize;
                                acc += w * buf[base + j * stride];
                            }
                            Boundary::ZeroPad => {
                                if idx >= 0 && (idx as usize) < len {
                                    acc += w * buf[base + idx as usize * stride];
                                }
                            }
                        }
                    }
                    *slot = acc;
                }
                for (i, &v) in scratch[..len].iter().enumerate() {
                    buf[base + i * stride] = v;
                }
            }
        }
    }
}

/// Lagrange weights for a stencil of `order + 1` unit-spaced nodes, evaluated
/// at `(order - 1) / 2 + frac` so the sample sits in the central interval.
///
/// Exact for polynomials up to degree `order`; reduces to a Kronecker delta
/// when `frac` is 0, so integer shifts round-trip to machine precision.
fn lagrange_weights(order: usize, frac: f64) -> Vec<f64> {
    let u = ((order - 1) / 2) as f64 + frac;
    let mut weights = vec![1.0; order + 1];
    for (k, w) in weights.iter_mut().enumerate() {
        for j in 0..=order {
            if j != k {
                *w *= (u - j as f64) / (k as f64 - j as f64);
            }
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frob(a: &Array2<f64>) -> f64 {
        a.iter().map(|&x| x * x).sum::<f64>().sqrt()
    }

    fn pulse_field(nx: usize, nt: usize, l: f64, speed: f64) -> (Array2<f64>, Array2<f64>) {
        let dx = l / nx as f64;
        let sigma = 0.08;
        let field = Array2::from_shape_fn((nx, nt), |(i, t)| {
            let x = i as f64 * dx;
            let s = speed * t as f64 / nt as f64;
            let mut d = (x - s - 0.5 * l).rem_euclid(l);
            if d > 0.5 * l {
                d -= l;
            }
            (-d * d / (sigma * sigma)).exp()
        });
        let shifts = Array2::from_shape_fn((1, nt), |(_, t)| speed * t as f64 / nt as f64);
        (field, shifts)
    }

    #[test]
    fn round_trip_error_shrinks_with_order() {
        let (field, shifts) = pulse_field(128, 24, 1.0, 0.37);
        let dx = 1.0 / 128.0;
        let mut last = f64::INFINITY;
        for order in [1, 3, 5] {
            let trafo =
                ShiftTransform::new(&[128], &[1.0], shifts.clone(), &[dx], order).unwrap();
            let err = trafo.interpolation_error(&field).unwrap();
            assert!(err < last, "order {} err {} not below {}", order, err, last);
            last = err;
        }
        assert!(last < 1e-5, "quintic round trip too lossy: {}", last);
    }

    #[test]
    fn integer_shifts_round_trip_exactly() {
        let nx = 32;
        let nt = 8;
        let dx = 1.0 / nx as f64;
        // Shifts that are whole grid cells reduce the stencil to a delta.
        let shifts = Array2::from_shape_fn((1, nt), |(_, t)| t as f64 * dx);
        let trafo = ShiftTransform::new(&[nx], &[1.0], shifts, &[dx], 3).unwrap();
        let field = Array2::from_shape_fn((nx, nt), |(i, t)| (i * 7 + t) as f64);
        let err = trafo.interpolation_error(&field).unwrap();
        assert!(err < 1e-12, "integer shift err {}", err);
    }

    #[test]
    fn apply_moves_a_peak_forward() {
        let nx = 64;
        let dx = 1.0 / nx as f64;
        let shifts = Array2::from_elem((1, 1), 10.0 * dx);
        let trafo = ShiftTransform::new(&[nx], &[1.0], shifts, &[dx], 1).unwrap();
        let mut field = Array2::zeros((nx, 1));
        field[[5, 0]] = 1.0;
        let moved = trafo.apply(&field).unwrap();
        assert!((moved[[15, 0]] - 1.0).abs() < 1e-12);
        assert!(moved[[5, 0]].abs() < 1e-12);
    }

    #[test]
    fn two_dimensional_shift_is_separable() {
        let (nx, ny) = (32, 24);
        let (dx, dy) = (1.0 / nx as f64, 1.0 / ny as f64);
        let nt = 6;
        let shifts = Array2::from_shape_fn((2, nt), |(d, t)| {
            let amp = if d == 0 { 0.21 } else { -0.13 };
            amp * (t as f64 + 1.0) / nt as f64
        });
        let trafo =
            ShiftTransform::new(&[nx, ny], &[1.0, 1.0], shifts, &[dx, dy], 5).unwrap();
        let field = Array2::from_shape_fn((nx * ny, nt), |(p, t)| {
            let (i, j) = (p / ny, p % ny);
            let x = i as f64 * dx;
            let y = j as f64 * dy;
            ((x * 2.0 + t as f64 * 0.1) * std::f64::consts::TAU).sin()
                * ((y * 2.0) * std::f64::consts::TAU).cos()
        });
        let err = trafo.interpolation_error(&field).unwrap();
        assert!(err < 5e-3, "2-D round trip err {}", err);
    }

    #[test]
    fn periodic_shift_preserves_column_sums() {
        let (field, shifts) = pulse_field(48, 12, 1.0, 0.29);
        let trafo = ShiftTransform::new(&[48], &[1.0], shifts, &[1.0 / 48.0], 3).unwrap();
        let shifted = trafo.apply(&field).unwrap();
        for t in 0..12 {
            let before: f64 = field.column(t).sum();
            let after: f64 = shifted.column(t).sum();
            assert!((before - after).abs() < 1e-10, "t={} {} vs {}", t, before, after);
        }
    }

    #[test]
    fn rejects_order_larger_than_axis() {
        let shifts = Array2::zeros((1, 4));
        let result = ShiftTransform::new(&[4], &[1.0], shifts, &[0.25], 5);
        assert!(matches!(result, Err(Error::InterpOrderTooLarge(..))));
    }

    #[test]
    fn rejects_inconsistent_grid_metadata() {
        let shifts = Array2::zeros((1, 4));
        // 16 points at spacing 0.1 do not cover an extent of 1.0.
        assert!(ShiftTransform::new(&[16], &[1.0], shifts, &[0.1], 3).is_err());
    }

    #[test]
    fn rejects_zero_pad_shift_beyond_extent() {
        let shifts = Array2::from_elem((1, 3), 1.5);
        let trafo = ShiftTransform::new(&[32], &[1.0], shifts, &[1.0 / 32.0], 3).unwrap();
        let result = trafo.with_boundary(Boundary::ZeroPad);
        assert!(matches!(result, Err(Error::ShiftOutOfRange(..))));
    }

    #[test]
    fn zero_pad_drops_mass_off_the_edge() {
        let nx = 32;
        let dx = 1.0 / nx as f64;
        let shifts = Array2::from_elem((1, 1), 0.5);
        let trafo = ShiftTransform::new(&[nx], &[1.0], shifts, &[dx], 1)
            .unwrap()
            .with_boundary(Boundary::ZeroPad)
            .unwrap();
        let mut field = Array2::zeros((nx, 1));
        field[[nx - 2, 0]] = 1.0;
        let moved = trafo.apply(&field).unwrap();
        assert!(frob(&moved) < 1e-12, "mass should leave the domain, not wrap");
    }

    #[test]
    fn rejects_mismatched_field_shape() {
        let shifts = Array2::zeros((1, 4));
        let trafo = ShiftTransform::new(&[16], &[1.0], shifts, &[1.0 / 16.0], 3).unwrap();
        let field = Array2::zeros((16, 5));
        assert!(matches!(
            trafo.apply(&field),
            Err(Error::FieldShapeMismatch(16, 5, 16, 4))
        ));
    }

    proptest! {
        #[test]
        fn lagrange_weights_sum_to_one(
            order in 1usize..6,
            frac in 0.0f64..1.0,
        ) {
            let w = lagrange_weights(order, frac);
            let sum: f64 = w.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-12);
        }

        #[test]
        fn lagrange_weights_reproduce_linear_ramps(
            order in 1usize..6,
            frac in 0.0f64..1.0,
        ) {
            // Interpolating f(x) = x on the stencil must give the sample point.
            let w = lagrange_weights(order, frac);
            let u = ((order - 1) / 2) as f64 + frac;
            let interp: f64 = w.iter().enumerate().map(|(j, &wj)| wj * j as f64).sum();
            prop_assert!((interp - u).abs() < 1e-10);
        }
    }
}
