//! Monotone interpolants
//!
//! Any curve family works for the projector as long as it never decreases
//! between non-decreasing knots and is deterministic. Outside the knot range
//! every interpolant holds its end value.

use crate::error::ProjectionError;

/// A fitted curve through `(x, y)` knots that never decreases
pub trait MonotoneInterpolant: Sized {
    /// Fit through `points`, which must be sorted by `x`
    ///
    /// Knots that do not advance `x` are skipped and `y` regressions are
    /// clamped to the previous value.
    fn fit(points: &[(f64, f64)]) -> Result<Self, ProjectionError>;

    fn eval(&self, x: f64) -> f64;
}

/// Strictly increasing x, non-decreasing y
fn monotone_knots(points: &[(f64, f64)]) -> Result<(Vec<f64>, Vec<f64>), ProjectionError> {
    let mut xs: Vec<f64> = Vec::with_capacity(points.len());
    let mut ys: Vec<f64> = Vec::with_capacity(points.len());

    for &(x, y) in points {
        if let Some(&last_x) = xs.last() {
            if x <= last_x {
                continue;
            }
        }
        let y = ys.last().map_or(y, |&prev: &f64| prev.max(y));
        xs.push(x);
        ys.push(y);
    }

    if xs.len() < 2 {
        return Err(ProjectionError::TooFewSamples(xs.len()));
    }
    Ok((xs, ys))
}

/// Index of the knot interval containing `x` (clamped to a valid interval)
fn interval(xs: &[f64], x: f64) -> usize {
    xs.partition_point(|&k| k <= x)
        .saturating_sub(1)
        .min(xs.len() - 2)
}

#[derive(Debug, Clone)]
pub struct PiecewiseLinear {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl MonotoneInterpolant for PiecewiseLinear {
    fn fit(points: &[(f64, f64)]) -> Result<Self, ProjectionError> {
        let (xs, ys) = monotone_knots(points)?;
        Ok(Self { xs, ys })
    }

    fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[n - 1] {
            return self.ys[n - 1];
        }

        let k = interval(&self.xs, x);
        let t = (x - self.xs[k]) / (self.xs[k + 1] - self.xs[k]);
        self.ys[k] + t * (self.ys[k + 1] - self.ys[k])
    }
}

/// Piecewise cubic Hermite with Fritsch-Carlson tangents
#[derive(Debug, Clone)]
pub struct MonotoneCubic {
    xs: Vec<f64>,
    ys: Vec<f64>,
    tangents: Vec<f64>,
}

impl MonotoneInterpolant for MonotoneCubic {
    fn fit(points: &[(f64, f64)]) -> Result<Self, ProjectionError> {
        let (xs, ys) = monotone_knots(points)?;
        let n = xs.len();

        let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
        let delta: Vec<f64> = (0..n - 1).map(|k| (ys[k + 1] - ys[k]) / h[k]).collect();

        let mut tangents = vec![0.0; n];
        tangents[0] = delta[0];
        tangents[n - 1] = delta[n - 2];
        for k in 1..n - 1 {
            if delta[k - 1] <= 0.0 || delta[k] <= 0.0 {
                continue;
            }
            // Weighted harmonic mean keeps each segment monotone
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            tangents[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
        }

        // Endpoint tangents may overshoot; limit to 3x the secant
        for (k, d) in [(0, delta[0]), (n - 1, delta[n - 2])] {
            if d <= 0.0 {
                tangents[k] = 0.0;
            } else {
                tangents[k] = tangents[k].clamp(0.0, 3.0 * d);
            }
        }

        Ok(Self { xs, ys, tangents })
    }

    fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[n - 1] {
            return self.ys[n - 1];
        }

        let k = interval(&self.xs, x);
        let h = self.xs[k + 1] - self.xs[k];
        let t = (x - self.xs[k]) / h;
        let t2 = t * t;
        let t3 = t2 * t;

        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;

        let y = h00 * self.ys[k]
            + h10 * h * self.tangents[k]
            + h01 * self.ys[k + 1]
            + h11 * h * self.tangents[k + 1];

        // Rounding can leave y a hair outside its interval
        y.clamp(self.ys[k], self.ys[k + 1])
    }
}

/// Linear for two knots, monotone cubic otherwise
#[derive(Debug, Clone)]
pub enum AutoInterpolant {
    Linear(PiecewiseLinear),
    Cubic(MonotoneCubic),
}

impl MonotoneInterpolant for AutoInterpolant {
    fn fit(points: &[(f64, f64)]) -> Result<Self, ProjectionError> {
        let linear = PiecewiseLinear::fit(points)?;
        if linear.xs.len() == 2 {
            return Ok(AutoInterpolant::Linear(linear));
        }
        Ok(AutoInterpolant::Cubic(MonotoneCubic::fit(points)?))
    }

    fn eval(&self, x: f64) -> f64 {
        match self {
            AutoInterpolant::Linear(i) => i.eval(x),
            AutoInterpolant::Cubic(i) => i.eval(x),
        }
    }
}
