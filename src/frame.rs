//! One co-moving frame of a decomposition.
//!
//! A frame pairs a [`ShiftTransform`] with the current low-rank factorization
//! of the field in that transform's co-moving coordinates. The solver
//! replaces the factorization wholesale each sweep; readers materialize the
//! lab-frame contribution on demand.

use crate::lowrank::TruncatedSvd;
use crate::transform::{Direction, ShiftTransform};
use ndarray::Array2;

/// A low-rank field in one co-moving coordinate system.
#[derive(Debug, Clone)]
pub struct Frame {
    transform: ShiftTransform,
    factors: TruncatedSvd,
}

impl Frame {
    /// A frame with rank 0: not yet active, contributing a zero field.
    pub fn new(transform: ShiftTransform) -> Self {
        let factors = TruncatedSvd::empty(transform.points(), transform.time_samples());
        Self { transform, factors }
    }

    /// Current rank of the stored factorization.
    pub fn rank(&self) -> usize {
        self.factors.rank()
    }

    /// The motion hypothesis this frame lives in.
    pub fn transform(&self) -> &ShiftTransform {
        &self.transform
    }

    /// The stored factorization.
    pub fn factors(&self) -> &TruncatedSvd {
        &self.factors
    }

    /// Replace the factorization (and with it the rank) atomically.
    pub fn update(&mut self, factors: TruncatedSvd) {
        self.factors = factors;
    }

    /// Dense field in co-moving coordinates, `U · diag(s) · Vᵀ`.
    pub fn co_moving_field(&self) -> Array2<f64> {
        self.factors.reconstruct()
    }

    /// Dense lab-frame contribution: the co-moving reconstruction pushed
    /// through the owned transform. Pure and idempotent; the factorization
    /// shapes always match the transform's grid by construction.
    pub fn build_field(&self) -> Array2<f64> {
        if self.rank() == 0 {
            return Array2::zeros((self.transform.points(), self.transform.time_samples()));
        }
        self.transform
            .resample(&self.co_moving_field(), Direction::Apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowrank::{truncated_svd, Rank, SvdMode};
    use ndarray::Array2;

    fn transform(nx: usize, nt: usize) -> ShiftTransform {
        let dx = 1.0 / nx as f64;
        let shifts = Array2::from_shape_fn((1, nt), |(_, t)| 0.2 * t as f64 / nt as f64);
        ShiftTransform::new(&[nx], &[1.0], shifts, &[dx], 3).unwrap()
    }

    #[test]
    fn fresh_frame_contributes_nothing() {
        let frame = Frame::new(transform(16, 4));
        assert_eq!(frame.rank(), 0);
        let field = frame.build_field();
        assert_eq!(field.dim(), (16, 4));
        assert!(field.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn build_field_is_idempotent() {
        let trafo = transform(24, 6);
        let data = Array2::from_shape_fn((24, 6), |(i, t)| {
            ((i as f64 * 0.41) + t as f64 * 0.13).sin()
        });
        let factors = truncated_svd(&data, Rank::Fixed(2), SvdMode::Exact).unwrap();
        let mut frame = Frame::new(trafo);
        frame.update(factors);
        assert_eq!(frame.rank(), 2);

        let first = frame.build_field();
        let second = frame.build_field();
        assert_eq!(first, second, "repeated reads must not drift");
    }

    #[test]
    fn update_replaces_rank_wholesale() {
        let trafo = transform(16, 4);
        let mut frame = Frame::new(trafo);
        let data = Array2::from_shape_fn((16, 4), |(i, t)| (i + t) as f64);
        frame.update(truncated_svd(&data, Rank::Fixed(2), SvdMode::Exact).unwrap());
        assert_eq!(frame.rank(), 2);
        frame.update(TruncatedSvd::empty(16, 4));
        assert_eq!(frame.rank(), 0);
    }
}
