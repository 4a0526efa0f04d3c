//! Small numeric helpers backing the prediction-based elasticity policies:
//! percentiles, a quadratic least-squares fit and the forecasting models
//! used by the conpaas policy. All of it is plain deterministic arithmetic.

/// Percentile with linear interpolation between closest ranks, over an
/// unsorted slice. `percentile` is given in [0, 100].
pub fn percentile(values: &[f64], percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = percentile / 100.0 * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        return sorted[low];
    }

    let fraction = rank - low as f64;
    sorted[low] + (sorted[high] - sorted[low]) * fraction
}

/// Least-squares fit of `y = c0 + c1*x + c2*x^2` through the sample points,
/// solved via the normal equations. Falls back to lower degrees when there
/// are too few points, and returns the evaluation at `x`.
pub fn quadratic_fit_at(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    let n = xs.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return ys[0];
    }
    if n == 2 {
        // Two points determine a line.
        let slope = (ys[1] - ys[0]) / (xs[1] - xs[0]);
        return ys[0] + slope * (x - xs[0]);
    }

    // Accumulate the moments of the normal equations A * c = b.
    let mut sx = [0.0f64; 5];
    let mut b = [0.0f64; 3];
    for (&xi, &yi) in xs.iter().zip(ys) {
        let mut power = 1.0;
        for s in sx.iter_mut() {
            *s += power;
            power *= xi;
        }
        b[0] += yi;
        b[1] += yi * xi;
        b[2] += yi * xi * xi;
    }

    let mut a = [
        [sx[0], sx[1], sx[2], b[0]],
        [sx[1], sx[2], sx[3], b[1]],
        [sx[2], sx[3], sx[4], b[2]],
    ];

    // Gaussian elimination with partial pivoting.
    for col in 0..3 {
        let pivot = (col..3)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            // Degenerate system (e.g. all x equal); fall back to the mean.
            return b[0] / sx[0];
        }
        a.swap(col, pivot);

        for row in (col + 1)..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let mut c = [0.0f64; 3];
    for col in (0..3).rev() {
        let mut value = a[col][3];
        for k in (col + 1)..3 {
            value -= a[col][k] * c[k];
        }
        c[col] = value / a[col][col];
    }

    c[0] + c[1] * x + c[2] * x * x
}

/// First-order auto-regressive forecast: the series mean plus the lag-1
/// autocorrelation applied to the last deviation, projected `steps` ahead.
pub fn auto_regression(data: &[f64], steps: usize) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }

    let n = data.len();
    let mean = data.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..n {
        let deviation = data[i] - mean;
        denominator += deviation * deviation;
        if i + 1 < n {
            numerator += deviation * (data[i + 1] - mean);
        }
    }
    let phi = if denominator.abs() < 1e-12 {
        0.0
    } else {
        numerator / denominator
    };

    let mut forecasts = Vec::with_capacity(steps);
    let mut deviation = data[n - 1] - mean;
    for _ in 0..steps {
        deviation *= phi;
        forecasts.push(mean + deviation);
    }
    forecasts
}

/// Ordinary least-squares line through the observation window, evaluated
/// `steps` points past the end.
pub fn linear_regression(data: &[f64], steps: usize) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }

    let n = data.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = data.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, &y) in data.iter().enumerate() {
        let dx = i as f64 - mean_x;
        numerator += dx * (y - mean_y);
        denominator += dx * dx;
    }
    let slope = if denominator.abs() < 1e-12 {
        0.0
    } else {
        numerator / denominator
    };
    let intercept = mean_y - slope * mean_x;

    (0..steps)
        .map(|step| intercept + slope * (n + step as f64))
        .collect()
}

/// Exponential smoothing with `alpha = 2 / (span + 1)`; the smoothed level
/// is the flat forecast for every future step.
pub fn exponential_smoothing(data: &[f64], span: usize, steps: usize) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let mut level = data[0];
    for &value in &data[1..] {
        level = alpha * value + (1.0 - alpha) * level;
    }

    vec![level; steps]
}

/// Linearly weighted average of a forecast list: later entries weigh more.
pub fn weighted_average(forecasts: &[f64]) -> f64 {
    if forecasts.is_empty() {
        return 0.0;
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (i, &value) in forecasts.iter().enumerate() {
        let weight = (i + 1) as f64;
        weighted_sum += weight * value;
        weight_total += weight;
    }
    weighted_sum / weight_total
}
