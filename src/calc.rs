//! Derived profile quantities. Every function works on one profile (one row
//! of a profile variable) or on a flat series of values.

use crate::error::ArchiveError;
use crate::store::VariableData;

/// Reference pressure in Pa for potential temperature.
pub const REFERENCE_PRESSURE: f64 = 610.0;

/// `theta = T * (610 / p)^0.25` per level.
pub fn potential_temperature(
    pressure: &[f64],
    temperature: &[f64],
) -> Result<Vec<f64>, ArchiveError> {
    same_length("pressure and temperature levels", pressure, temperature)?;
    Ok(pressure
        .iter()
        .zip(temperature)
        .map(|(p, t)| t * (REFERENCE_PRESSURE / p).powf(0.25))
        .collect())
}

/// First difference along the levels. The last level has no successor and
/// is NaN, so the output keeps the input length.
pub fn level_diff(values: &[f64]) -> Vec<f64> {
    let mut diff: Vec<f64> = values.windows(2).map(|pair| pair[1] - pair[0]).collect();
    if !values.is_empty() {
        diff.push(f64::NAN);
    }
    diff
}

/// `d values / d altitude` between neighbouring levels, NaN-padded like
/// [`level_diff`].
pub fn vertical_gradient(altitude: &[f64], values: &[f64]) -> Result<Vec<f64>, ArchiveError> {
    same_length("altitude and profile levels", altitude, values)?;
    Ok(level_diff(values)
        .into_iter()
        .zip(level_diff(altitude))
        .map(|(dv, dz)| dv / dz)
        .collect())
}

/// Applies `f` to every profile of a float profile variable and joins the
/// results. `None` for integer data.
pub fn per_profile(data: &VariableData, f: impl Fn(&[f64]) -> Vec<f64>) -> Option<Vec<f64>> {
    let values = data.values.as_float()?;
    Some(values.chunks(data.width.max(1)).flat_map(f).collect())
}

/// Geometric mean in `base`: `base^(mean(log_base x))`, ignoring NaN.
pub fn log_mean(values: &[f64], base: f64) -> f64 {
    base.powf(nan_mean(&logs(values, base)))
}

/// `base^(std(log_base x))` with population variance, ignoring NaN.
pub fn log_std(values: &[f64], base: f64) -> f64 {
    let logs = logs(values, base);
    let mean = nan_mean(&logs);
    let deviations: Vec<f64> = logs.iter().map(|x| (x - mean).powi(2)).collect();
    base.powf(nan_mean(&deviations).sqrt())
}

/// Linear-interpolated quantile of the non-NaN values; NaN when there are
/// none. `q` is clamped to `[0, 1]`.
pub fn nan_quantile(values: &[f64], q: f64) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(f64::total_cmp);
    let position = q.clamp(0.0, 1.0) * (finite.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    finite[lower] + (finite[upper] - finite[lower]) * fraction
}

pub fn nan_median(values: &[f64]) -> f64 {
    nan_quantile(values, 0.5)
}

pub fn inf_to_nan(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .map(|v| if v.is_infinite() { f64::NAN } else { *v })
        .collect()
}

fn logs(values: &[f64], base: f64) -> Vec<f64> {
    values.iter().map(|v| v.log(base)).collect()
}

fn nan_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { f64::NAN } else { sum / count as f64 }
}

fn same_length(what: &'static str, left: &[f64], right: &[f64]) -> Result<(), ArchiveError> {
    if left.len() != right.len() {
        return Err(ArchiveError::LengthMismatch {
            what,
            left: left.len(),
            right: right.len(),
        });
    }
    Ok(())
}
