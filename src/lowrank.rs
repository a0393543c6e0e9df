//! Truncated SVD and rank selection.
//!
//! Every solver variant funnels its projection step through this module:
//! a rank-`r` (or tolerance-driven) factorization that is Eckart–Young
//! optimal in the Frobenius norm. Two execution modes are offered:
//!
//! - [`SvdMode::Exact`]: one-sided Jacobi rotations until all column pairs
//!   are orthogonal. Dense SVD semantics, deterministic.
//! - [`SvdMode::Randomized`]: the Halko–Martinsson–Tropp sketch — a Gaussian
//!   test matrix, a few power iterations, then an exact SVD of the small
//!   projected matrix. Unbiased in expectation; the achieved rank is whatever
//!   the sketch supports and is reported via [`TruncatedSvd::rank`].
//!
//! Trailing singular values at round-off level are always dropped, so a
//! (near-)zero input yields a rank-0 factorization rather than an error.
//!
//! # References
//!
//! - Halko, Martinsson, Tropp (2011). "Finding Structure with Randomness"
//! - Eckart & Young (1936). "The approximation of one matrix by another of
//!   lower rank"

use crate::{Error, Result};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// Relative cutoff below which singular values count as numerically zero.
const ROUNDOFF_CUTOFF: f64 = 1e-13;

/// How many modes to keep.
#[derive(Debug, Clone, Copy)]
pub enum Rank {
    /// Exactly this many modes (fewer if the matrix has lower numerical rank).
    Fixed(usize),
    /// The minimal rank whose discarded Frobenius tail stays below this
    /// fraction of the matrix norm.
    Tolerance(f64),
}

/// Exact vs randomized rank reduction.
#[derive(Debug, Clone, Copy)]
pub enum SvdMode {
    /// Dense one-sided Jacobi SVD.
    Exact,
    /// Randomized range sketch with `rank + oversamples` Gaussian probes and
    /// `power_iters` subspace iterations, seeded for reproducibility.
    Randomized {
        oversamples: usize,
        power_iters: usize,
        seed: u64,
    },
}

impl SvdMode {
    /// Randomized mode with the conventional defaults (10 extra probes,
    /// 2 power iterations).
    pub fn randomized(seed: u64) -> Self {
        SvdMode::Randomized {
            oversamples: 10,
            power_iters: 2,
            seed,
        }
    }
}

impl Default for SvdMode {
    fn default() -> Self {
        SvdMode::Exact
    }
}

/// A rank-r factorization `U · diag(s) · Vᵀ`.
#[derive(Debug, Clone)]
pub struct TruncatedSvd {
    /// Left singular vectors, shape (rows, rank).
    pub u: Array2<f64>,
    /// Singular values, descending.
    pub s: Array1<f64>,
    /// Right singular vectors transposed, shape (rank, columns).
    pub vt: Array2<f64>,
}

impl TruncatedSvd {
    /// The rank-0 factorization of a `rows × cols` zero matrix.
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            u: Array2::zeros((rows, 0)),
            s: Array1::zeros(0),
            vt: Array2::zeros((0, cols)),
        }
    }

    /// Number of retained modes.
    pub fn rank(&self) -> usize {
        self.s.len()
    }

    /// Materialize the dense matrix `U · diag(s) · Vᵀ`.
    pub fn reconstruct(&self) -> Array2<f64> {
        let mut us = self.u.clone();
        for (j, &sv) in self.s.iter().enumerate() {
            us.column_mut(j).mapv_inplace(|x| x * sv);
        }
        us.dot(&self.vt)
    }

    /// Keep only the leading `rank` modes.
    pub fn keep(self, rank: usize) -> Self {
        let r = rank.min(self.rank());
        Self {
            u: self.u.slice(ndarray::s![.., ..r]).to_owned(),
            s: self.s.slice(ndarray::s![..r]).to_owned(),
            vt: self.vt.slice(ndarray::s![..r, ..]).to_owned(),
        }
    }
}

/// Best rank-limited approximation of `matrix` in the least-squares sense.
///
/// With [`Rank::Fixed`] the result has at most that many modes; with
/// [`Rank::Tolerance`] the smallest rank meeting the relative Frobenius
/// tolerance is chosen. An identically zero matrix yields rank 0.
///
/// # Example
///
/// ```rust
/// use ndarray::array;
/// use spod::{truncated_svd, Rank, SvdMode};
///
/// let m = array![[5.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
/// let f = truncated_svd(&m, Rank::Fixed(1), SvdMode::Exact).unwrap();
/// assert_eq!(f.rank(), 1);
/// assert!((f.s[0] - 5.0).abs() < 1e-12);
/// ```
pub fn truncated_svd(matrix: &Array2<f64>, rank: Rank, mode: SvdMode) -> Result<TruncatedSvd> {
    if let Rank::Tolerance(eps) = rank {
        if eps <= 0.0 || !eps.is_finite() {
            return Err(Error::InvalidTolerance(eps));
        }
    }
    let (rows, cols) = matrix.dim();
    if frob(matrix) == 0.0 {
        return Ok(TruncatedSvd::empty(rows, cols));
    }
    let (u, s, vt) = match mode {
        SvdMode::Exact => jacobi_svd(matrix),
        SvdMode::Randomized {
            oversamples,
            power_iters,
            seed,
        } => {
            let sketch = match rank {
                Rank::Fixed(r) => r.saturating_add(oversamples),
                // A tolerance target has no a-priori rank; sketch the full
                // small dimension so the tail estimate stays trustworthy.
                Rank::Tolerance(_) => rows.min(cols),
            };
            randomized_svd(matrix, sketch, power_iters, seed)
        }
    };
    Ok(select(u, s, vt, rank))
}

/// Soft-threshold the spectrum of `matrix`: keep modes with `s_i > tau`,
/// subtract `tau` from each, cap the rank at `max_rank`.
///
/// This is the proximal operator of the nuclear norm, the low-rank update
/// step of the robust solver.
pub fn singular_value_threshold(
    matrix: &Array2<f64>,
    tau: f64,
    max_rank: usize,
    mode: SvdMode,
) -> Result<TruncatedSvd> {
    if tau <= 0.0 || !tau.is_finite() {
        return Err(Error::InvalidPenalty(tau));
    }
    let (rows, cols) = matrix.dim();
    if frob(matrix) == 0.0 {
        return Ok(TruncatedSvd::empty(rows, cols));
    }
    let (u, s, vt) = match mode {
        SvdMode::Exact => jacobi_svd(matrix),
        SvdMode::Randomized {
            oversamples,
            power_iters,
            seed,
        } => randomized_svd(matrix, max_rank.saturating_add(oversamples), power_iters, seed),
    };
    let kept = s
        .iter()
        .take(max_rank)
        .take_while(|&&sv| sv > tau)
        .count();
    let mut f = TruncatedSvd { u, s, vt }.keep(kept);
    f.s.mapv_inplace(|sv| sv - tau);
    Ok(f)
}

/// Elementwise shrinkage `sign(x) · max(|x| - tau, 0)`.
pub fn soft_threshold(matrix: &Array2<f64>, tau: f64) -> Array2<f64> {
    matrix.mapv(|x| x.signum() * (x.abs() - tau).max(0.0))
}

pub(crate) fn frob(a: &Array2<f64>) -> f64 {
    a.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Apply the rank policy to a descending spectrum.
fn select(u: Array2<f64>, s: Array1<f64>, vt: Array2<f64>, rank: Rank) -> TruncatedSvd {
    let s0 = if s.is_empty() { 0.0 } else { s[0] };
    let numerical = s.iter().take_while(|&&sv| sv > s0 * ROUNDOFF_CUTOFF).count();
    let kept = match rank {
        Rank::Fixed(r) => r.min(numerical),
        Rank::Tolerance(eps) => {
            let total: f64 = s.iter().map(|&sv| sv * sv).sum();
            let budget = eps * eps * total;
            // Walk from the back until the discarded tail would exceed the
            // budget.
            let mut tail = 0.0;
            let mut r = s.len();
            while r > 0 {
                let next = tail + s[r - 1] * s[r - 1];
                if next > budget {
                    break;
                }
                tail = next;
                r -= 1;
            }
            r.min(numerical)
        }
    };
    TruncatedSvd { u, s, vt }.keep(kept)
}

/// Full SVD by one-sided Jacobi rotations.
///
/// Rotates column pairs of the working matrix until every pair is orthogonal;
/// the column norms are then the singular values. For wide matrices the
/// problem is transposed first. Returns `min(rows, cols)` triplets sorted by
/// descending singular value, with zero columns for zero singular values.
fn jacobi_svd(a: &Array2<f64>) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    let (m, n) = a.dim();
    if m < n {
        let (u, s, vt) = jacobi_svd(&a.t().to_owned());
        return (vt.t().to_owned(), s, u.t().to_owned());
    }
    if n == 0 {
        return (Array2::zeros((m, 0)), Array1::zeros(0), Array2::zeros((0, 0)));
    }

    let mut work = a.to_owned();
    let mut v = Array2::<f64>::eye(n);
    let max_sweeps = 60;
    let tol = 1e-14;

    for _ in 0..max_sweeps {
        let mut rotated = false;
        for p in 0..n.saturating_sub(1) {
            for q in p + 1..n {
                let mut alpha = 0.0;
                let mut beta = 0.0;
                let mut gamma = 0.0;
                for i in 0..m {
                    let wp = work[[i, p]];
                    let wq = work[[i, q]];
                    alpha += wp * wp;
                    beta += wq * wq;
                    gamma += wp * wq;
                }
                if gamma.abs() <= tol * (alpha * beta).sqrt() {
                    continue;
                }
                rotated = true;
                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
                let cs = 1.0 / (1.0 + t * t).sqrt();
                let sn = cs * t;
                for i in 0..m {
                    let wp = work[[i, p]];
                    let wq = work[[i, q]];
                    work[[i, p]] = cs * wp - sn * wq;
                    work[[i, q]] = sn * wp + cs * wq;
                }
                for i in 0..n {
                    let vp = v[[i, p]];
                    let vq = v[[i, q]];
                    v[[i, p]] = cs * vp - sn * vq;
                    v[[i, q]] = sn * vp + cs * vq;
                }
            }
        }
        if !rotated {
            break;
        }
    }

    let norms: Vec<f64> = (0..n)
        .map(|j| work.column(j).iter().map(|&x| x * x).sum::<f64>().sqrt())
        .collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| norms[j].total_cmp(&norms[i]));

    let mut u = Array2::zeros((m, n));
    let mut s = Array1::zeros(n);
    let mut vt = Array2::zeros((n, n));
    for (new, &old) in order.iter().enumerate() {
        s[new] = norms[old];
        if norms[old] > 0.0 {
            for i in 0..m {
                u[[i, new]] = work[[i, old]] / norms[old];
            }
        }
        for j in 0..n {
            vt[[new, j]] = v[[j, old]];
        }
    }
    (u, s, vt)
}

/// Randomized spectrum estimate of up to `sketch` modes.
fn randomized_svd(
    a: &Array2<f64>,
    sketch: usize,
    power_iters: usize,
    seed: u64,
) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    let (m, n) = a.dim();
    let l = sketch.max(1).min(m).min(n);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let omega: Array2<f64> = Array2::from_shape_fn((n, l), |_| rng.sample(StandardNormal));

    let mut q = orthonormalize(&a.dot(&omega));
    for _ in 0..power_iters {
        if q.ncols() == 0 {
            break;
        }
        let w = orthonormalize(&a.t().dot(&q));
        q = orthonormalize(&a.dot(&w));
    }
    if q.ncols() == 0 {
        return (
            Array2::zeros((m, 0)),
            Array1::zeros(0),
            Array2::zeros((0, n)),
        );
    }

    let b = q.t().dot(a);
    let (ub, s, vt) = jacobi_svd(&b);
    (q.dot(&ub), s, vt)
}

/// Modified Gram-Schmidt with one reorthogonalization pass. Columns that
/// collapse below round-off are dropped, so the result may be narrower than
/// the input.
fn orthonormalize(a: &Array2<f64>) -> Array2<f64> {
    let (m, n) = a.dim();
    let scale = frob(a);
    if scale == 0.0 {
        return Array2::zeros((m, 0));
    }
    let drop_tol = scale * 1e-12;
    let mut basis: Vec<Array1<f64>> = Vec::with_capacity(n);
    for j in 0..n {
        let mut v = a.column(j).to_owned();
        for _ in 0..2 {
            for b in &basis {
                let proj = b.dot(&v);
                v.scaled_add(-proj, b);
            }
        }
        let norm = v.dot(&v).sqrt();
        if norm > drop_tol {
            v /= norm;
            basis.push(v);
        }
    }
    let mut out = Array2::zeros((m, basis.len()));
    for (j, b) in basis.iter().enumerate() {
        out.column_mut(j).assign(b);
    }
    out
}
