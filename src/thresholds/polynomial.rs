//! Least-squares polynomial fit of lactate over load
//!
//! The abscissa is centred on the mean load and scaled by the half range so
//! the normal equations stay well conditioned for loads in the hundreds.

const PIVOT_EPSILON: f64 = 1e-12;

/// Polynomial in the normalised variable `t = (x - center) / scale`
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    /// Coefficients in ascending order of power of `t`
    coeffs: Vec<f64>,
    center: f64,
    scale: f64,
}

impl Polynomial {
    /// Fit a polynomial of `degree` to the points. Returns `None` when the
    /// system is singular (too few distinct loads for the degree).
    pub fn fit(xs: &[f64], ys: &[f64], degree: usize) -> Option<Self> {
        if xs.len() != ys.len() || xs.len() <= degree {
            return None;
        }

        let n = xs.len() as f64;
        let center = xs.iter().sum::<f64>() / n;
        let (min, max) = xs
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        let scale = (max - min) / 2.0;
        if !(scale > 0.0) {
            return None;
        }

        let size = degree + 1;
        // Power sums of t up to 2 * degree
        let mut power_sums = vec![0.0; 2 * degree + 1];
        let mut rhs = vec![0.0; size];
        for (&x, &y) in xs.iter().zip(ys) {
            let t = (x - center) / scale;
            let mut tp = 1.0;
            for (k, sum) in power_sums.iter_mut().enumerate() {
                *sum += tp;
                if k < size {
                    rhs[k] += tp * y;
                }
                tp *= t;
            }
        }

        let mut matrix: Vec<Vec<f64>> = (0..size)
            .map(|row| (0..size).map(|col| power_sums[row + col]).collect())
            .collect();

        let coeffs = solve(&mut matrix, &mut rhs)?;
        Some(Polynomial {
            coeffs,
            center,
            scale,
        })
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    fn to_t(&self, x: f64) -> f64 {
        (x - self.center) / self.scale
    }

    fn to_x(&self, t: f64) -> f64 {
        self.center + t * self.scale
    }

    fn coeff(&self, k: usize) -> f64 {
        self.coeffs.get(k).copied().unwrap_or(0.0)
    }

    /// Value at load `x`
    pub fn eval(&self, x: f64) -> f64 {
        let t = self.to_t(x);
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * t + c)
    }

    /// Loads in `[lo, hi]` where the slope dy/dx equals `slope`.
    /// Only defined for degree three or lower.
    pub fn points_with_slope(&self, slope: f64, lo: f64, hi: f64) -> Vec<f64> {
        // dy/dx = f'(t) / scale, so solve 3c3 t^2 + 2c2 t + c1 - slope * scale = 0
        let a = 3.0 * self.coeff(3);
        let b = 2.0 * self.coeff(2);
        let c = self.coeff(1) - slope * self.scale;

        let roots: Vec<f64> = if a.abs() < PIVOT_EPSILON {
            if b.abs() < PIVOT_EPSILON {
                Vec::new()
            } else {
                vec![-c / b]
            }
        } else {
            let discriminant = b * b - 4.0 * a * c;
            if discriminant < 0.0 {
                Vec::new()
            } else {
                let root = discriminant.sqrt();
                vec![(-b - root) / (2.0 * a), (-b + root) / (2.0 * a)]
            }
        };

        let mut points: Vec<f64> = roots
            .into_iter()
            .map(|t| self.to_x(t))
            .filter(|x| x.is_finite() && *x >= lo && *x <= hi)
            .collect();
        points.sort_by(f64::total_cmp);
        points
    }

    /// Location and value of the minimum on `[lo, hi]`
    pub fn minimum(&self, lo: f64, hi: f64) -> (f64, f64) {
        let mut candidates = vec![lo, hi];
        candidates.extend(self.points_with_slope(0.0, lo, hi));
        candidates
            .into_iter()
            .map(|x| (x, self.eval(x)))
            .fold((lo, self.eval(lo)), |best, cur| if cur.1 < best.1 { cur } else { best })
    }

    /// First load in `[lo, hi]` where the curve rises to `target`, refined by bisection
    pub fn first_crossing(&self, target: f64, lo: f64, hi: f64) -> Option<f64> {
        const SCAN_STEPS: usize = 200;
        const BISECTION_STEPS: usize = 60;

        if !(hi > lo) {
            return None;
        }
        if self.eval(lo) >= target {
            return None;
        }

        let step = (hi - lo) / SCAN_STEPS as f64;
        let mut left = lo;
        for i in 1..=SCAN_STEPS {
            let right = if i == SCAN_STEPS { hi } else { lo + step * i as f64 };
            if self.eval(right) >= target {
                let (mut a, mut b) = (left, right);
                for _ in 0..BISECTION_STEPS {
                    let mid = 0.5 * (a + b);
                    if self.eval(mid) >= target {
                        b = mid;
                    } else {
                        a = mid;
                    }
                }
                return Some(b);
            }
            left = right;
        }
        None
    }
}

/// Gaussian elimination with partial pivoting
fn solve(matrix: &mut [Vec<f64>], rhs: &mut [f64]) -> Option<Vec<f64>> {
    let n = rhs.len();
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&a, &b| matrix[a][col].abs().total_cmp(&matrix[b][col].abs()))?;
        if matrix[pivot_row][col].abs() < PIVOT_EPSILON {
            return None;
        }
        matrix.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = matrix[row][col] / matrix[col][col];
            for k in col..n {
                let delta = factor * matrix[col][k];
                matrix[row][k] -= delta;
            }
            let delta = factor * rhs[col];
            rhs[row] -= delta;
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| matrix[row][k] * solution[k]).sum();
        solution[row] = (rhs[row] - tail) / matrix[row][row];
    }

    if solution.iter().all(|c| c.is_finite()) {
        Some(solution)
    } else {
        None
    }
}
