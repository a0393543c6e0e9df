//! # spod
//!
//! Shifted proper orthogonal decomposition: split transport-dominated
//! snapshot data into a few additive co-moving frames, each low-rank in the
//! coordinate system that travels with its feature.
//!
//! ## The Problem
//!
//! A traveling wave has slowly decaying singular values in the lab frame —
//! classical POD needs many modes for what is really one moving shape. Viewed
//! from a frame co-moving with the wave the data is (nearly) rank one. Given
//! a snapshot matrix Q (flattened space × time) and one motion hypothesis per
//! feature, the solvers here find low-rank content in every co-moving frame
//! whose shifted sum reproduces Q.
//!
//! ## Key Functions
//!
//! | Function | Use Case | Rank handling |
//! |----------|----------|---------------|
//! | [`shifted_pod`] | known rank per frame | fixed |
//! | [`shifted_pod_adaptive`] | unknown ranks | grows per sweep, capped |
//! | [`shifted_rpca`] | corrupted / noisy samples | singular-value threshold + sparse term |
//!
//! ## Quick Start
//!
//! ```rust
//! use ndarray::Array2;
//! use spod::{shifted_pod, ShiftTransform, SpodParams};
//!
//! // A Gaussian pulse drifting to the right with speed c.
//! let (nx, nt) = (64, 16);
//! let (l, c) = (1.0, 0.5);
//! let dx = l / nx as f64;
//! let q = Array2::from_shape_fn((nx, nt), |(i, t)| {
//!     let mut d = (i as f64 * dx - c * t as f64 / nt as f64 - 0.3).rem_euclid(l);
//!     if d > 0.5 * l { d -= l; }
//!     (-d * d / 0.01).exp()
//! });
//! let shifts = Array2::from_shape_fn((1, nt), |(_, t)| c * t as f64 / nt as f64);
//! let trafo = ShiftTransform::new(&[nx], &[l], shifts, &[dx], 5).unwrap();
//!
//! let ret = shifted_pod(&q, &[trafo], &[1], &SpodParams::default()).unwrap();
//! assert_eq!(ret.ranks(), vec![1]);
//! assert!(*ret.rel_err_hist.last().unwrap() < 1e-3);
//! ```
//!
//! ## What Can Go Wrong
//!
//! 1. **Tolerance below the interpolation floor**: the transforms' resampling
//!    error bounds the reachable residual. Check
//!    [`ShiftTransform::interpolation_error`] before tightening `eps`.
//! 2. **Wrong motion hypothesis**: a frame whose shift field does not match
//!    any transported feature soaks up rank without lowering the residual.
//! 3. **Robust variant tuning**: `mu` sets the singular-value threshold
//!    (`1/mu`) and `lambd/mu` the sparsity threshold; a `lambd` near
//!    `1/sqrt(max(rows, cols))` is the usual starting point.
//! 4. **Exact SVD on large snapshots**: one-sided Jacobi is dense; switch to
//!    [`SvdMode::Randomized`] when matrices grow beyond a few hundred
//!    columns.
//!
//! ## References
//!
//! - Reiss, Schulze, Sesterhenn, Mehrmann (2018). "The Shifted Proper
//!   Orthogonal Decomposition: A Mode Decomposition for Multiple Transport
//!   Phenomena"
//! - Candès, Li, Ma, Wright (2011). "Robust Principal Component Analysis?"
//! - Lin, Chen, Ma (2010). "The Augmented Lagrange Multiplier Method for
//!   Exact Recovery of Corrupted Low-Rank Matrices"

use ndarray::Array2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub mod frame;
pub mod lowrank;
pub mod transform;

pub use frame::Frame;
pub use lowrank::{
    singular_value_threshold, soft_threshold, truncated_svd, Rank, SvdMode, TruncatedSvd,
};
pub use transform::{Boundary, ShiftTransform};

use lowrank::frob;

/// Decomposition error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Snapshot matrix does not match the transforms' grid and time layout.
    #[error("snapshot matrix is {0}×{1} but the transform grid expects {2} points × {3} time samples")]
    SnapshotShapeMismatch(usize, usize, usize, usize),

    /// A field passed to a transform has the wrong shape.
    #[error("field is {0}×{1} but the transform grid expects {2} points × {3} time samples")]
    FieldShapeMismatch(usize, usize, usize, usize),

    /// Inconsistent grid metadata at transform construction.
    #[error("invalid grid: {0}")]
    Grid(&'static str),

    /// Interpolation stencil wider than an axis.
    #[error("interpolation order {0} needs a {1}-point stencil but the axis has only {2} points")]
    InterpOrderTooLarge(usize, usize, usize),

    /// A non-periodic shift would push every sample off the grid.
    #[error("shift {0} exceeds the domain extent {1} under a non-periodic boundary")]
    ShiftOutOfRange(f64, f64),

    /// Iteration budget must be positive.
    #[error("iteration budget must be positive")]
    NonPositiveIter,

    /// Invalid stopping tolerance or cutoff.
    #[error("tolerance must be positive and finite, got {0}")]
    InvalidTolerance(f64),

    /// Invalid rank request.
    #[error("rank must be positive, got {0}")]
    InvalidRank(usize),

    /// Invalid penalty / weight parameter.
    #[error("penalty parameter must be positive and finite, got {0}")]
    InvalidPenalty(f64),

    /// Domain error (invalid inputs for the mathematical definition).
    #[error("{0}")]
    Domain(&'static str),
}

/// Result type for decomposition operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Shared solver configuration.
///
/// `eps` is the relative Frobenius stopping tolerance, `niter` the sweep
/// budget. The optional `stop` flag is polled between sweeps so a caller can
/// interrupt a long run without corrupting the returned histories.
#[derive(Debug, Clone)]
pub struct SpodParams {
    /// Relative-error stopping tolerance.
    pub eps: f64,
    /// Maximum number of sweeps.
    pub niter: usize,
    /// Exact or randomized rank reduction.
    pub svd: SvdMode,
    /// Cooperative early-stop flag, polled between sweeps.
    pub stop: Option<Arc<AtomicBool>>,
}

impl Default for SpodParams {
    fn default() -> Self {
        Self {
            eps: 1e-4,
            niter: 100,
            svd: SvdMode::Exact,
            stop: None,
        }
    }
}

impl SpodParams {
    /// Parameters with the given tolerance and sweep budget.
    pub fn new(eps: f64, niter: usize) -> Self {
        Self {
            eps,
            niter,
            ..Self::default()
        }
    }

    /// Select the rank-reduction mode.
    pub fn with_svd(mut self, svd: SvdMode) -> Self {
        self.svd = svd;
        self
    }

    /// Install a cooperative early-stop flag.
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.niter == 0 {
            return Err(Error::NonPositiveIter);
        }
        if self.eps <= 0.0 || !self.eps.is_finite() {
            return Err(Error::InvalidTolerance(self.eps));
        }
        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.stop
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

/// Rank schedule of [`shifted_pod_adaptive`].
///
/// Each sweep a frame's target rank grows by `step` (up to the cap) while
/// the residual is still above the tolerance; after the SVD, only modes with
/// `s_i ≥ sv_cutoff · s_1` are kept, which lets a frame's rank shrink again
/// once the other frames explain their share of the data.
#[derive(Debug, Clone, Copy)]
pub struct RankGrowth {
    /// Modes added per sweep and frame.
    pub step: usize,
    /// Relative singular-value cutoff for keeping a mode.
    pub sv_cutoff: f64,
}

impl Default for RankGrowth {
    fn default() -> Self {
        Self {
            step: 1,
            sv_cutoff: 1e-4,
        }
    }
}

impl RankGrowth {
    fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(Error::Domain("rank growth step must be at least 1"));
        }
        if self.sv_cutoff <= 0.0 || self.sv_cutoff >= 1.0 || !self.sv_cutoff.is_finite() {
            return Err(Error::InvalidTolerance(self.sv_cutoff));
        }
        Ok(())
    }
}

/// Everything a solver returns. Owned by the caller; nothing is shared with
/// later invocations.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// One frame per motion hypothesis, in input order.
    pub frames: Vec<Frame>,
    /// Lab-frame reconstruction, the shifted sum of all frames.
    pub approx: Array2<f64>,
    /// Relative error after each completed sweep.
    pub rel_err_hist: Vec<f64>,
    /// Per-frame rank after each completed sweep (one inner vec per frame).
    pub rank_hist: Vec<Vec<usize>>,
    /// Sparse outlier estimate; `Some` only for [`shifted_rpca`].
    pub noise: Option<Array2<f64>>,
}

impl Decomposition {
    /// Final rank of every frame.
    pub fn ranks(&self) -> Vec<usize> {
        self.frames.iter().map(Frame::rank).collect()
    }
}

/// Shape and parameter validation shared by all solvers. Returns `‖Q‖_F`.
fn validate_problem(
    q: &Array2<f64>,
    transforms: &[ShiftTransform],
    params: &SpodParams,
) -> Result<f64> {
    params.validate()?;
    if transforms.is_empty() {
        return Err(Error::Domain("at least one co-moving frame is required"));
    }
    for trafo in transforms {
        if trafo.points() != q.nrows() || trafo.time_samples() != q.ncols() {
            return Err(Error::SnapshotShapeMismatch(
                q.nrows(),
                q.ncols(),
                trafo.points(),
                trafo.time_samples(),
            ));
        }
    }
    let norm_q = frob(q);
    if norm_q == 0.0 {
        return Err(Error::Domain(
            "snapshot matrix is identically zero; relative error is undefined",
        ));
    }
    Ok(norm_q)
}

/// Shifted sum of all frame contributions.
fn total_reconstruction(frames: &[Frame]) -> Array2<f64> {
    let mut total = frames[0].build_field();
    for frame in &frames[1..] {
        total += &frame.build_field();
    }
    total
}

/// Fixed-rank shifted POD.
///
/// Alternates over the frames in a Gauss-Seidel sweep: each frame sees the
/// current residual plus its own previous contribution, warped into its
/// co-moving coordinates, and is replaced by the best rank-`nmodes[k]`
/// approximation of that matrix. Stops when the relative error drops below
/// `params.eps` or the sweep budget is exhausted; either way the per-sweep
/// error and rank histories are returned in full.
pub fn shifted_pod(
    q: &Array2<f64>,
    transforms: &[ShiftTransform],
    nmodes: &[usize],
    params: &SpodParams,
) -> Result<Decomposition> {
    let norm_q = validate_problem(q, transforms, params)?;
    if nmodes.len() != transforms.len() {
        return Err(Error::Domain("one target rank per frame is required"));
    }
    if let Some(&r) = nmodes.iter().find(|&&r| r == 0) {
        return Err(Error::InvalidRank(r));
    }

    let mut frames: Vec<Frame> = transforms.iter().cloned().map(Frame::new).collect();
    let mut approx: Array2<f64> = Array2::zeros(q.raw_dim());
    let mut rel_err_hist = Vec::new();
    let mut rank_hist = vec![Vec::new(); frames.len()];

    for sweep in 0..params.niter {
        if params.interrupted() {
            break;
        }
        for (k, trafo) in transforms.iter().enumerate() {
            let contribution = frames[k].build_field();
            let target = q - &approx + &contribution;
            let co_moving = trafo.reverse(&target)?;
            let factors = truncated_svd(&co_moving, Rank::Fixed(nmodes[k]), params.svd)?;
            frames[k].update(factors);
            approx = approx - contribution + frames[k].build_field();
        }
        // Rebuild from scratch so incremental updates cannot drift.
        approx = total_reconstruction(&frames);
        let rel_err = frob(&(q - &approx)) / norm_q;
        rel_err_hist.push(rel_err);
        for (k, frame) in frames.iter().enumerate() {
            rank_hist[k].push(frame.rank());
        }
        tracing::debug!("shifted_pod sweep {}: rel_err {:.3e}", sweep + 1, rel_err);
        if rel_err < params.eps {
            break;
        }
    }

    Ok(Decomposition {
        frames,
        approx,
        rel_err_hist,
        rank_hist,
        noise: None,
    })
}

/// Rank-adaptive shifted POD.
///
/// Same alternating skeleton as [`shifted_pod`], but every frame starts at
/// rank 0 and follows the [`RankGrowth`] schedule: grow by `growth.step`
/// modes per sweep while the global relative error is above `params.eps`,
/// never beyond `nmodes_max`, and drop modes whose singular value falls under
/// `growth.sv_cutoff` relative to the frame's leading one. Reaching the cap
/// before the tolerance is not an error; the returned history shows it.
pub fn shifted_pod_adaptive(
    q: &Array2<f64>,
    transforms: &[ShiftTransform],
    nmodes_max: usize,
    growth: &RankGrowth,
    params: &SpodParams,
) -> Result<Decomposition> {
    let norm_q = validate_problem(q, transforms, params)?;
    if nmodes_max == 0 {
        return Err(Error::InvalidRank(nmodes_max));
    }
    growth.validate()?;

    let mut frames: Vec<Frame> = transforms.iter().cloned().map(Frame::new).collect();
    let mut approx: Array2<f64> = Array2::zeros(q.raw_dim());
    let mut rel_err_hist: Vec<f64> = Vec::new();
    let mut rank_hist = vec![Vec::new(); frames.len()];

    for sweep in 0..params.niter {
        if params.interrupted() {
            break;
        }
        let prev_rel = rel_err_hist.last().copied().unwrap_or(f64::INFINITY);
        for (k, trafo) in transforms.iter().enumerate() {
            let target_rank = if prev_rel > params.eps {
                (frames[k].rank() + growth.step).min(nmodes_max)
            } else {
                frames[k].rank()
            };
            let contribution = frames[k].build_field();
            let target = q - &approx + &contribution;
            let co_moving = trafo.reverse(&target)?;
            let factors = truncated_svd(&co_moving, Rank::Fixed(target_rank), params.svd)?;
            let kept = if factors.rank() == 0 {
                0
            } else {
                factors
                    .s
                    .iter()
                    .take_while(|&&sv| sv >= growth.sv_cutoff * factors.s[0])
                    .count()
            };
            frames[k].update(factors.keep(kept));
            approx = approx - contribution + frames[k].build_field();
        }
        approx = total_reconstruction(&frames);
        let rel_err = frob(&(q - &approx)) / norm_q;
        rel_err_hist.push(rel_err);
        for (k, frame) in frames.iter().enumerate() {
            rank_hist[k].push(frame.rank());
        }
        tracing::debug!(
            "shifted_pod_adaptive sweep {}: rel_err {:.3e}, ranks {:?}",
            sweep + 1,
            rel_err,
            frames.iter().map(Frame::rank).collect::<Vec<_>>()
        );
        if rel_err < params.eps {
            break;
        }
    }

    Ok(Decomposition {
        frames,
        approx,
        rel_err_hist,
        rank_hist,
        noise: None,
    })
}

/// Robust shifted decomposition (low-rank frames + sparse outliers).
///
/// Augmented-Lagrangian splitting of `Q = Σ_k T_k(L_k) + E` with a nuclear
/// penalty on every co-moving `L_k` and an `ℓ₁` penalty `lambd` on `E`,
/// following the inexact ALM schedule with penalty `mu`:
///
/// 1. each frame is updated against `Q − E + Y/mu` (minus the other frames)
///    by singular-value thresholding at `1/mu`, capped at `nmodes_max`;
/// 2. `E ← shrink_{lambd/mu}(Q − R + Y/mu)` where `R` is the shifted sum;
/// 3. dual update `Y ← Y + mu (Q − R − E)`.
///
/// Stops when `‖Q − R − E‖_F / ‖Q‖_F < params.eps` or the budget runs out.
/// The sparse estimate is returned in [`Decomposition::noise`].
pub fn shifted_rpca(
    q: &Array2<f64>,
    transforms: &[ShiftTransform],
    nmodes_max: usize,
    mu: f64,
    lambd: f64,
    params: &SpodParams,
) -> Result<Decomposition> {
    let norm_q = validate_problem(q, transforms, params)?;
    if nmodes_max == 0 {
        return Err(Error::InvalidRank(nmodes_max));
    }
    if mu <= 0.0 || !mu.is_finite() {
        return Err(Error::InvalidPenalty(mu));
    }
    if lambd <= 0.0 || !lambd.is_finite() {
        return Err(Error::InvalidPenalty(lambd));
    }

    let mut frames: Vec<Frame> = transforms.iter().cloned().map(Frame::new).collect();
    let mut approx: Array2<f64> = Array2::zeros(q.raw_dim());
    let mut sparse: Array2<f64> = Array2::zeros(q.raw_dim());
    let mut dual: Array2<f64> = Array2::zeros(q.raw_dim());
    let mut rel_err_hist = Vec::new();
    let mut rank_hist = vec![Vec::new(); frames.len()];

    for sweep in 0..params.niter {
        if params.interrupted() {
            break;
        }
        let dual_scaled = dual.mapv(|y| y / mu);
        let base = q - &sparse + &dual_scaled;
        for (k, trafo) in transforms.iter().enumerate() {
            let contribution = frames[k].build_field();
            let target = &base - &approx + &contribution;
            let co_moving = trafo.reverse(&target)?;
            let factors =
                singular_value_threshold(&co_moving, 1.0 / mu, nmodes_max, params.svd)?;
            frames[k].update(factors);
            approx = approx - contribution + frames[k].build_field();
        }
        approx = total_reconstruction(&frames);
        sparse = soft_threshold(&(q - &approx + &dual_scaled), lambd / mu);
        let residual = q - &approx - &sparse;
        dual.scaled_add(mu, &residual);

        let rel_err = frob(&residual) / norm_q;
        rel_err_hist.push(rel_err);
        for (k, frame) in frames.iter().enumerate() {
            rank_hist[k].push(frame.rank());
        }
        tracing::debug!(
            "shifted_rpca sweep {}: rel_err {:.3e}, ranks {:?}",
            sweep + 1,
            rel_err,
            frames.iter().map(Frame::rank).collect::<Vec<_>>()
        );
        if rel_err < params.eps {
            break;
        }
    }

    Ok(Decomposition {
        frames,
        approx,
        rel_err_hist,
        rank_hist,
        noise: Some(sparse),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn pulse(nx: usize, nt: usize, speed: f64) -> (Array2<f64>, ShiftTransform) {
        let l = 1.0;
        let dx = l / nx as f64;
        let q = Array2::from_shape_fn((nx, nt), |(i, t)| {
            let mut d = (i as f64 * dx - speed * t as f64 / nt as f64 - 0.4).rem_euclid(l);
            if d > 0.5 * l {
                d -= l;
            }
            (-d * d / 0.008).exp()
        });
        let shifts = Array2::from_shape_fn((1, nt), |(_, t)| speed * t as f64 / nt as f64);
        let trafo = ShiftTransform::new(&[nx], &[l], shifts, &[dx], 5).unwrap();
        (q, trafo)
    }

    #[test]
    fn rejects_zero_iteration_budget() {
        let (q, trafo) = pulse(32, 8, 0.3);
        let params = SpodParams::new(1e-4, 0);
        assert!(matches!(
            shifted_pod(&q, &[trafo], &[1], &params),
            Err(Error::NonPositiveIter)
        ));
    }

    #[test]
    fn rejects_non_positive_tolerance() {
        let (q, trafo) = pulse(32, 8, 0.3);
        let params = SpodParams::new(0.0, 10);
        assert!(matches!(
            shifted_pod(&q, &[trafo], &[1], &params),
            Err(Error::InvalidTolerance(_))
        ));
    }

    #[test]
    fn rejects_zero_rank() {
        let (q, trafo) = pulse(32, 8, 0.3);
        assert!(matches!(
            shifted_pod(&q, &[trafo], &[0], &SpodParams::default()),
            Err(Error::InvalidRank(0))
        ));
    }

    #[test]
    fn rejects_missing_rank_entries() {
        let (q, trafo) = pulse(32, 8, 0.3);
        assert!(shifted_pod(&q, &[trafo], &[], &SpodParams::default()).is_err());
    }

    #[test]
    fn rejects_empty_transform_list() {
        let (q, _) = pulse(32, 8, 0.3);
        assert!(shifted_pod(&q, &[], &[1], &SpodParams::default()).is_err());
    }

    #[test]
    fn rejects_shape_mismatch() {
        let (_, trafo) = pulse(32, 8, 0.3);
        let q = Array2::from_elem((32, 9), 1.0);
        assert!(matches!(
            shifted_pod(&q, &[trafo], &[1], &SpodParams::default()),
            Err(Error::SnapshotShapeMismatch(32, 9, 32, 8))
        ));
    }

    #[test]
    fn rejects_zero_snapshot_matrix() {
        let (_, trafo) = pulse(32, 8, 0.3);
        let q = Array2::zeros((32, 8));
        assert!(shifted_pod(&q, &[trafo], &[1], &SpodParams::default()).is_err());
    }

    #[test]
    fn rejects_bad_growth_schedule() {
        let (q, trafo) = pulse(32, 8, 0.3);
        let growth = RankGrowth {
            step: 0,
            sv_cutoff: 1e-4,
        };
        assert!(
            shifted_pod_adaptive(&q, &[trafo.clone()], 4, &growth, &SpodParams::default())
                .is_err()
        );
        let growth = RankGrowth {
            step: 1,
            sv_cutoff: 2.0,
        };
        assert!(shifted_pod_adaptive(&q, &[trafo], 4, &growth, &SpodParams::default()).is_err());
    }

    #[test]
    fn rejects_bad_penalties() {
        let (q, trafo) = pulse(32, 8, 0.3);
        let params = SpodParams::default();
        assert!(shifted_rpca(&q, &[trafo.clone()], 4, 0.0, 0.1, &params).is_err());
        assert!(shifted_rpca(&q, &[trafo], 4, 1.0, f64::NAN, &params).is_err());
    }

    #[test]
    fn stop_flag_interrupts_before_the_first_sweep() {
        let (q, trafo) = pulse(32, 8, 0.3);
        let flag = Arc::new(AtomicBool::new(true));
        let params = SpodParams::new(1e-12, 50).with_stop(flag);
        let ret = shifted_pod(&q, &[trafo], &[1], &params).unwrap();
        assert!(ret.rel_err_hist.is_empty());
        assert!(ret.rank_hist.iter().all(Vec::is_empty));
    }

    #[test]
    fn histories_have_one_entry_per_sweep() {
        let (q, trafo) = pulse(48, 12, 0.3);
        let params = SpodParams::new(1e-12, 7);
        let ret = shifted_pod(&q, &[trafo], &[1], &params).unwrap();
        let sweeps = ret.rel_err_hist.len();
        assert!(sweeps >= 1 && sweeps <= 7);
        assert!(ret.rank_hist.iter().all(|h| h.len() == sweeps));
    }

    #[test]
    fn single_frame_pulse_is_rank_one() {
        let (q, trafo) = pulse(64, 16, 0.4);
        let params = SpodParams::new(1e-3, 20);
        let ret = shifted_pod(&q, &[trafo], &[1], &params).unwrap();
        assert_eq!(ret.ranks(), vec![1]);
        let final_err = ret.rel_err_hist.last().copied().unwrap_or(1.0);
        assert!(final_err < 1e-3, "rel err {}", final_err);
    }
}
