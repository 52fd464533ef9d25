/// Hand-rolled Augmented Dickey-Fuller stationarity test.
///
/// No crate in the available dependency stack provides this (the
/// `statsmodels` equivalent doesn't exist for Rust), so the regression is
/// solved directly via the OLS normal equations and Gauss-Jordan matrix
/// inversion, lag order is chosen by AIC, and the p-value is an
/// interpolation over a fixed table of asymptotic Dickey-Fuller critical
/// values (constant, no trend). This is an approximation: it is not
/// bit-exact with `statsmodels.tsa.stattools.adfuller`.
pub struct AdfResult {
    pub statistic: f64,
    pub pvalue: f64,
}

/// Runs the test on `series`, selecting lag order 0..=min(4, floor(L/4))
/// by AIC. Returns `None` if the series is too short to fit any candidate
/// regression (callers should already have checked `L >= 50`).
pub fn adf_test(series: &[f64]) -> Option<AdfResult> {
    let n = series.len();
    if n < 8 {
        return None;
    }

    let diff: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let max_lag = (n / 4).min(4);

    let mut best: Option<(f64, OlsFit)> = None;
    for p in 0..=max_lag {
        if let Some(fit) = fit_adf_regression(series, &diff, p) {
            let aic = fit.aic();
            if best.as_ref().map_or(true, |(best_aic, _)| aic < *best_aic) {
                best = Some((aic, fit));
            }
        }
    }

    let (_, fit) = best?;
    let statistic = fit.coeffs[1] / fit.se[1];
    let pvalue = approximate_pvalue(statistic);
    Some(AdfResult { statistic, pvalue })
}

struct OlsFit {
    coeffs: Vec<f64>,
    se: Vec<f64>,
    rss: f64,
    n_obs: usize,
    k: usize,
}

impl OlsFit {
    fn aic(&self) -> f64 {
        let n = self.n_obs as f64;
        n * (self.rss / n).ln() + 2.0 * self.k as f64
    }
}

/// Builds and fits `Δy_i = α + β·y_{i-1} + Σ_{j=1}^{p} γ_j·Δy_{i-j} + ε_i`
/// for rows `i = p+1 ..= n-1` (0-indexed into `series`).
fn fit_adf_regression(series: &[f64], diff: &[f64], p: usize) -> Option<OlsFit> {
    let n = series.len();
    if n < p + 3 {
        return None;
    }
    let k = p + 2;
    let rows: Vec<usize> = ((p + 1)..n).collect();
    let n_obs = rows.len();
    if n_obs <= k {
        return None;
    }

    let mut x = Vec::with_capacity(n_obs);
    let mut y = Vec::with_capacity(n_obs);
    for &i in &rows {
        let mut row = Vec::with_capacity(k);
        row.push(1.0);
        row.push(series[i - 1]);
        for j in 1..=p {
            row.push(diff[i - j - 1]);
        }
        x.push(row);
        y.push(diff[i - 1]);
    }

    let (coeffs, xtx_inv) = ols_fit(&x, &y)?;

    let mut rss = 0.0;
    for (row, &yi) in x.iter().zip(y.iter()) {
        let pred: f64 = row.iter().zip(coeffs.iter()).map(|(a, b)| a * b).sum();
        rss += (yi - pred).powi(2);
    }
    let sigma2 = rss / (n_obs - k) as f64;
    let se: Vec<f64> = (0..k).map(|i| (xtx_inv[i][i] * sigma2).sqrt()).collect();

    Some(OlsFit {
        coeffs,
        se,
        rss,
        n_obs,
        k,
    })
}

/// Solves `y = X·β` by normal equations, returning the coefficient vector
/// and `(XᵀX)⁻¹` (needed for standard errors).
fn ols_fit(x: &[Vec<f64>], y: &[f64]) -> Option<(Vec<f64>, Vec<Vec<f64>>)> {
    let k = x[0].len();
    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];

    for (row, &yi) in x.iter().zip(y.iter()) {
        for a in 0..k {
            xty[a] += row[a] * yi;
            for b in 0..k {
                xtx[a][b] += row[a] * row[b];
            }
        }
    }

    let xtx_inv = gauss_jordan_invert(&xtx)?;
    let coeffs: Vec<f64> = (0..k)
        .map(|a| (0..k).map(|b| xtx_inv[a][b] * xty[b]).sum())
        .collect();

    Some((coeffs, xtx_inv))
}

/// In-place Gauss-Jordan inversion via an augmented `[A | I]` matrix.
/// Returns `None` if `a` is singular.
fn gauss_jordan_invert(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let k = a.len();
    let mut aug: Vec<Vec<f64>> = a
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut full = row.clone();
            full.extend((0..k).map(|j| if i == j { 1.0 } else { 0.0 }));
            full
        })
        .collect();

    for col in 0..k {
        let pivot_row = (col..k).max_by(|&r1, &r2| {
            aug[r1][col].abs().partial_cmp(&aug[r2][col].abs()).unwrap()
        })?;
        if aug[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        aug.swap(col, pivot_row);

        let pivot = aug[col][col];
        for v in aug[col].iter_mut() {
            *v /= pivot;
        }

        for r in 0..k {
            if r == col {
                continue;
            }
            let factor = aug[r][col];
            if factor != 0.0 {
                for c in 0..(2 * k) {
                    aug[r][c] -= factor * aug[col][c];
                }
            }
        }
    }

    Some(aug.into_iter().map(|row| row[k..].to_vec()).collect())
}

/// Asymptotic Dickey-Fuller critical values for the constant, no-trend
/// case (MacKinnon 1994), ascending by statistic.
const DF_TABLE: [(f64, f64); 6] = [
    (-4.5, 0.001),
    (-3.43, 0.01),
    (-3.12, 0.025),
    (-2.86, 0.05),
    (-2.57, 0.10),
    (0.0, 0.90),
];

fn approximate_pvalue(stat: f64) -> f64 {
    if stat <= DF_TABLE[0].0 {
        return DF_TABLE[0].1;
    }
    if stat >= DF_TABLE[DF_TABLE.len() - 1].0 {
        return 0.99;
    }
    for window in DF_TABLE.windows(2) {
        let (s0, p0) = window[0];
        let (s1, p1) = window[1];
        if stat >= s0 && stat <= s1 {
            let frac = (stat - s0) / (s1 - s0);
            return p0 + frac * (p1 - p0);
        }
    }
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_stationary_mean_reverting_series() {
        // Deterministic damped oscillation around 0 — strongly stationary.
        let series: Vec<f64> = (0..120)
            .map(|i| {
                let x = i as f64 * 0.3;
                (-0.05 * i as f64).exp() * x.sin()
            })
            .collect();
        let result = adf_test(&series).expect("regression should fit");
        assert!(result.statistic < 0.0);
    }

    #[test]
    fn detects_random_walk_as_less_stationary_than_mean_reverting() {
        let mut walk = Vec::with_capacity(120);
        let mut acc = 0.0;
        for i in 0..120 {
            acc += if i % 2 == 0 { 1.0 } else { -0.9 };
            walk.push(acc);
        }
        let stationary: Vec<f64> = (0..120)
            .map(|i| (-0.1 * i as f64).exp() * (i as f64 * 0.4).sin())
            .collect();

        let walk_result = adf_test(&walk).unwrap();
        let stationary_result = adf_test(&stationary).unwrap();
        assert!(stationary_result.statistic < walk_result.statistic);
    }

    #[test]
    fn pvalue_interpolates_monotonically() {
        assert!(approximate_pvalue(-4.5) < approximate_pvalue(-3.43));
        assert!(approximate_pvalue(-3.43) < approximate_pvalue(-2.86));
        assert!(approximate_pvalue(-2.86) < approximate_pvalue(0.0));
    }

    #[test]
    fn too_short_series_returns_none() {
        assert!(adf_test(&[1.0, 2.0, 3.0]).is_none());
    }
}
