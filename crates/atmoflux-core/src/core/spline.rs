//! Interpolating cubic splines.
//!
//! [`CubicSpline1D`] uses not-a-knot end conditions, so it reproduces any cubic
//! polynomial exactly and matches an unsmoothed degree-3 B-spline fit through
//! the same points. [`GridSpline2D`] builds a tensor-product interpolant out of
//! one-dimensional splines on a rectilinear grid.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum SplineError {
    #[error("At least two knots are required, got {0}")]
    TooFewPoints(usize),
    #[error("Knots and values differ in length ({knots} vs {values})")]
    LengthMismatch { knots: usize, values: usize },
    #[error("Knots must be finite and strictly monotonic")]
    NonMonotonicKnots,
    #[error("Spline coefficient system is singular")]
    Singular,
}

/// Piecewise cubic `y = a + b·t + c·t² + d·t³` with `t = x - knots[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline1D {
    knots: Vec<f64>,
    coeffs: Vec<[f64; 4]>,
}

impl CubicSpline1D {
    pub fn new(knots: &[f64], values: &[f64]) -> Result<Self, SplineError> {
        let n = knots.len();
        if n != values.len() {
            return Err(SplineError::LengthMismatch {
                knots: n,
                values: values.len(),
            });
        }
        if n < 2 {
            return Err(SplineError::TooFewPoints(n));
        }
        if knots.iter().any(|k| !k.is_finite()) || knots.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SplineError::NonMonotonicKnots);
        }

        let h: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();
        let slopes: Vec<f64> = values
            .windows(2)
            .zip(&h)
            .map(|(w, hi)| (w[1] - w[0]) / hi)
            .collect();
        let second = match n {
            2 => vec![0.0; 2],
            3 => {
                let curvature = 2.0 * (slopes[1] - slopes[0]) / (knots[2] - knots[0]);
                vec![curvature; 3]
            }
            _ => Self::not_a_knot_second_derivatives(&h, &slopes)?,
        };

        let coeffs = (0..n - 1)
            .map(|i| {
                let (m0, m1) = (second[i], second[i + 1]);
                [
                    values[i],
                    slopes[i] - h[i] * (2.0 * m0 + m1) / 6.0,
                    m0 / 2.0,
                    (m1 - m0) / (6.0 * h[i]),
                ]
            })
            .collect();

        Ok(Self {
            knots: knots.to_vec(),
            coeffs,
        })
    }

    fn not_a_knot_second_derivatives(h: &[f64], slopes: &[f64]) -> Result<Vec<f64>, SplineError> {
        let n = h.len() + 1;
        let mut rhs = DVector::<f64>::zeros(n);
        for i in 1..n - 1 {
            rhs[i] = 6.0 * (slopes[i] - slopes[i - 1]);
        }
        let solution = not_a_knot_system(h)
            .lu()
            .solve(&rhs)
            .ok_or(SplineError::Singular)?;
        Ok(solution.iter().copied().collect())
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    fn segment(&self, x: f64) -> (usize, f64) {
        let last = self.coeffs.len() - 1;
        let i = self.knots.partition_point(|&k| k <= x).saturating_sub(1).min(last);
        (i, x - self.knots[i])
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let (i, t) = self.segment(x);
        let [a, b, c, d] = self.coeffs[i];
        a + t * (b + t * (c + t * d))
    }

    pub fn derivative(&self, x: f64) -> f64 {
        let (i, t) = self.segment(x);
        let [_, b, c, d] = self.coeffs[i];
        b + t * (2.0 * c + t * 3.0 * d)
    }
}

/// Coefficient matrix of the not-a-knot second-derivative system for
/// interval widths `h` (at least three intervals).
fn not_a_knot_system(h: &[f64]) -> DMatrix<f64> {
    let n = h.len() + 1;
    let mut a = DMatrix::<f64>::zeros(n, n);

    // Third derivative continuous across the second and penultimate knots.
    a[(0, 0)] = h[1];
    a[(0, 1)] = -(h[0] + h[1]);
    a[(0, 2)] = h[0];
    a[(n - 1, n - 3)] = h[n - 2];
    a[(n - 1, n - 2)] = -(h[n - 3] + h[n - 2]);
    a[(n - 1, n - 1)] = h[n - 3];

    for i in 1..n - 1 {
        a[(i, i - 1)] = h[i - 1];
        a[(i, i)] = 2.0 * (h[i - 1] + h[i]);
        a[(i, i + 1)] = h[i];
    }
    a
}

/// Not-a-knot interpolation along one fixed axis, as a linear map from knot
/// values to the spline.
///
/// The second derivatives at the knots are `operator · values`, so the system
/// is solved once per axis instead of once per evaluation.
#[derive(Debug, Clone)]
struct KnotOperator {
    knots: Vec<f64>,
    h: Vec<f64>,
    operator: DMatrix<f64>,
}

impl KnotOperator {
    fn new(knots: Vec<f64>) -> Result<Self, SplineError> {
        let n = knots.len();
        if n < 2 {
            return Err(SplineError::TooFewPoints(n));
        }
        if knots.iter().any(|k| !k.is_finite()) || knots.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SplineError::NonMonotonicKnots);
        }
        let h: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();

        let operator = match n {
            2 => DMatrix::zeros(2, 2),
            3 => {
                let scale = 2.0 / (knots[2] - knots[0]);
                let row = [
                    scale / h[0],
                    -scale * (1.0 / h[0] + 1.0 / h[1]),
                    scale / h[1],
                ];
                DMatrix::from_fn(3, 3, |_, j| row[j])
            }
            _ => {
                // Maps values onto the right-hand side 6·(slope[i] - slope[i-1]).
                let mut rhs = DMatrix::<f64>::zeros(n, n);
                for i in 1..n - 1 {
                    rhs[(i, i - 1)] = 6.0 / h[i - 1];
                    rhs[(i, i)] = -6.0 * (1.0 / h[i - 1] + 1.0 / h[i]);
                    rhs[(i, i + 1)] = 6.0 / h[i];
                }
                not_a_knot_system(&h)
                    .lu()
                    .solve(&rhs)
                    .ok_or(SplineError::Singular)?
            }
        };
        Ok(Self { knots, h, operator })
    }

    fn second_derivative(&self, knot: usize, values: &[f64]) -> f64 {
        self.operator
            .row(knot)
            .iter()
            .zip(values)
            .map(|(w, v)| w * v)
            .sum()
    }

    /// Value at `x` of the spline through `values`; outside the knots the end
    /// segments are extended.
    fn evaluate(&self, values: &[f64], x: f64) -> f64 {
        let last = self.h.len() - 1;
        let i = self.knots.partition_point(|&k| k <= x).saturating_sub(1).min(last);
        let (t, h) = (x - self.knots[i], self.h[i]);
        let m0 = self.second_derivative(i, values);
        let m1 = self.second_derivative(i + 1, values);
        let slope = (values[i + 1] - values[i]) / h;
        let b = slope - h * (2.0 * m0 + m1) / 6.0;
        values[i] + t * (b + t * (m0 / 2.0 + t * (m1 - m0) / (6.0 * h)))
    }
}

/// Tensor-product spline over `x` × `y` with values laid out as `values[ix][iy]`.
#[derive(Debug, Clone)]
pub struct GridSpline2D {
    x: KnotOperator,
    rows: Vec<CubicSpline1D>,
}

impl GridSpline2D {
    pub fn new(x: &[f64], y: &[f64], values: &[Vec<f64>]) -> Result<Self, SplineError> {
        if values.len() != x.len() {
            return Err(SplineError::LengthMismatch {
                knots: x.len(),
                values: values.len(),
            });
        }
        let (x_sorted, x_order) = ascending_order(x);
        let (y_sorted, y_order) = ascending_order(y);
        let rows = x_order
            .iter()
            .map(|&ix| {
                let row = &values[ix];
                if row.len() != y.len() {
                    return Err(SplineError::LengthMismatch {
                        knots: y.len(),
                        values: row.len(),
                    });
                }
                let reordered: Vec<f64> = y_order.iter().map(|&iy| row[iy]).collect();
                CubicSpline1D::new(&y_sorted, &reordered)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            x: KnotOperator::new(x_sorted)?,
            rows,
        })
    }

    fn column(&self, y: f64) -> Vec<f64> {
        self.rows.iter().map(|r| r.evaluate(y)).collect()
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        self.x.evaluate(&self.column(y), x)
    }

    /// Evaluates on the outer product of `xs` and `ys`, returning `[ix][iy]`.
    pub fn evaluate_grid(&self, xs: &[f64], ys: &[f64]) -> Vec<Vec<f64>> {
        let mut out = vec![vec![0.0; ys.len()]; xs.len()];
        for (iy, &y) in ys.iter().enumerate() {
            let column = self.column(y);
            for (ix, &x) in xs.iter().enumerate() {
                out[ix][iy] = self.x.evaluate(&column, x);
            }
        }
        out
    }
}

/// Sorts an axis ascending and returns the permutation used.
fn ascending_order(axis: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..axis.len()).collect();
    order.sort_by(|&a, &b| axis[a].total_cmp(&axis[b]));
    (order.iter().map(|&i| axis[i]).collect(), order)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn reproduces_cubic_polynomials_exactly() {
        let f = |x: f64| 1.0 - 2.0 * x + 0.5 * x * x + 0.25 * x * x * x;
        let knots = [-2.0, -0.5, 0.0, 1.0, 2.5, 4.0];
        let values: Vec<f64> = knots.iter().map(|&x| f(x)).collect();
        let spline = CubicSpline1D::new(&knots, &values).unwrap();
        for x in [-3.0, -1.7, 0.3, 1.9, 3.3, 5.0] {
            assert!(f64_approx_equal(spline.evaluate(x), f(x)), "x = {x}");
            let df = -2.0 + x + 0.75 * x * x;
            assert!(f64_approx_equal(spline.derivative(x), df), "x = {x}");
        }
    }

    #[test]
    fn passes_through_knots() {
        let knots = [0.0, 1.0, 2.0, 3.0, 4.0];
        let values = [0.0, 1.0, 0.0, 1.0, 0.0];
        let spline = CubicSpline1D::new(&knots, &values).unwrap();
        for (&k, &v) in knots.iter().zip(&values) {
            assert!(f64_approx_equal(spline.evaluate(k), v));
        }
    }

    #[test]
    fn three_points_give_a_parabola() {
        let spline = CubicSpline1D::new(&[0.0, 1.0, 3.0], &[0.0, 1.0, 9.0]).unwrap();
        assert!(f64_approx_equal(spline.evaluate(2.0), 4.0));
        assert!(f64_approx_equal(spline.derivative(-1.0), -2.0));
    }

    #[test]
    fn two_points_give_a_line() {
        let spline = CubicSpline1D::new(&[1.0, 3.0], &[2.0, 6.0]).unwrap();
        assert!(f64_approx_equal(spline.evaluate(5.0), 10.0));
    }

    #[test]
    fn rejects_bad_knots() {
        assert_eq!(
            CubicSpline1D::new(&[0.0, 0.0, 1.0], &[1.0, 2.0, 3.0]),
            Err(SplineError::NonMonotonicKnots)
        );
        assert_eq!(
            CubicSpline1D::new(&[0.0], &[1.0]),
            Err(SplineError::TooFewPoints(1))
        );
    }

    #[test]
    fn grid_spline_reproduces_bicubic_and_accepts_descending_axes() {
        let f = |x: f64, y: f64| x * x * y - 2.0 * y * y * y + x;
        let xs = [0.0, 0.5, 1.0, 1.5, 2.0];
        let ys = [0.95, 0.55, 0.15, -0.25, -0.65, -0.95];
        let values: Vec<Vec<f64>> = xs
            .iter()
            .map(|&x| ys.iter().map(|&y| f(x, y)).collect())
            .collect();
        let spline = GridSpline2D::new(&xs, &ys, &values).unwrap();

        assert!(f64_approx_equal(spline.evaluate(0.7, 0.3), f(0.7, 0.3)));
        let grid = spline.evaluate_grid(&[0.2, 1.8], &[-0.5, 0.0, 0.5]);
        assert!(f64_approx_equal(grid[1][2], f(1.8, 0.5)));
        assert!(f64_approx_equal(grid[0][0], f(0.2, -0.5)));
    }

    #[test]
    fn grid_spline_matches_column_splines_built_per_point() {
        let xs: Vec<f64> = (0..9).map(|i| 0.1 * i as f64 + 0.02 * (i * i) as f64).collect();
        let ys: Vec<f64> = (0..12).map(|i| 0.3 * i as f64).collect();
        let values: Vec<Vec<f64>> = xs
            .iter()
            .map(|&x| ys.iter().map(|&y| (3.0 * x).sin() * (-0.2 * y).exp() + x * y).collect())
            .collect();
        let spline = GridSpline2D::new(&xs, &ys, &values).unwrap();
        let rows: Vec<CubicSpline1D> = values
            .iter()
            .map(|row| CubicSpline1D::new(&ys, row).unwrap())
            .collect();

        for &x in &[-0.1, 0.0, 0.37, 0.8, 1.55, 2.1] {
            for &y in &[-0.5, 0.0, 1.23, 2.9, 3.3, 4.0] {
                let column: Vec<f64> = rows.iter().map(|r| r.evaluate(y)).collect();
                let expected = CubicSpline1D::new(&xs, &column).unwrap().evaluate(x);
                assert!(
                    f64_approx_equal(spline.evaluate(x, y), expected),
                    "x = {x}, y = {y}"
                );
            }
        }
    }

    #[test]
    fn grid_spline_handles_short_axes() {
        for xs in [vec![0.0, 1.0], vec![0.0, 1.0, 3.0]] {
            let ys = [0.0, 1.0, 2.0, 3.0];
            let values: Vec<Vec<f64>> = xs
                .iter()
                .map(|&x| ys.iter().map(|&y| x * x + y).collect())
                .collect();
            let spline = GridSpline2D::new(&xs, &ys, &values).unwrap();
            let column: Vec<f64> = values.iter().map(|row| row[1]).collect();
            let expected = CubicSpline1D::new(&xs, &column).unwrap().evaluate(2.0);
            assert!(f64_approx_equal(spline.evaluate(2.0, 1.0), expected));
        }
        assert!(matches!(
            GridSpline2D::new(&[0.0], &[0.0, 1.0], &[vec![1.0, 2.0]]),
            Err(SplineError::TooFewPoints(1))
        ));
    }
}
