//! Deterministic forecasting engine.
//!
//! Pure numeric code: no I/O, no capability calls. Given identical input the
//! output is identical, which is what makes stage 4 the only reproducible
//! stage in the pipeline.

use crate::models::{ForecastOutcome, ForecastResult, InsufficientData, TimeSeries};

/// Ordinary least-squares fit over (day-offset, value) pairs.
///
/// Degenerate-flat policy: when the x variance is zero (fewer than two
/// distinct x) the slope is 0 and the intercept is the mean of y. Never
/// divides by zero.
fn linear_fit(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let numerator: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();
    let denominator: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();

    if denominator == 0.0 {
        (0.0, y_mean)
    } else {
        let slope = numerator / denominator;
        (slope, y_mean - slope * x_mean)
    }
}

/// R² of the fitted line against the observations. A constant series is a
/// perfect fit when the residuals are zero, otherwise no fit at all.
fn r_squared(xs: &[f64], ys: &[f64], slope: f64, intercept: f64) -> f64 {
    let y_mean = ys.iter().sum::<f64>() / ys.len() as f64;
    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    let ss_tot: f64 = ys.iter().map(|y| (y - y_mean).powi(2)).sum();

    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Mean observed units per day. Calendar gaps between observations count as
/// zero-activity days, so the denominator is the spanned day count rather
/// than the observation count.
fn daily_velocity(xs: &[f64], ys: &[f64]) -> f64 {
    if ys.is_empty() {
        return 0.0;
    }
    let span_days = match xs.last() {
        Some(last) => last + 1.0,
        None => return 0.0,
    };
    ys.iter().sum::<f64>() / span_days
}

/// Forecast demand over `horizon_days` from a chronologically ordered series.
///
/// Fewer than two observations is not an error: the engine degrades to an
/// `InsufficientData` outcome carrying the velocity it could compute.
pub fn forecast(series: &TimeSeries, horizon_days: u32, safety_multiplier: f64) -> ForecastOutcome {
    debug_assert!(safety_multiplier > 1.0);

    let points = series.points();
    if points.len() < 2 {
        let velocity = points.first().map(|p| p.value).unwrap_or(0.0);
        return ForecastOutcome::InsufficientData(InsufficientData {
            daily_velocity: velocity,
            observations: points.len(),
            r_squared: 0.0,
        });
    }

    let start = points[0].date;
    let xs: Vec<f64> = points
        .iter()
        .map(|p| (p.date - start).num_days() as f64)
        .collect();
    let ys: Vec<f64> = points.iter().map(|p| p.value).collect();

    let (slope, intercept) = linear_fit(&xs, &ys);
    let r2 = r_squared(&xs, &ys, slope, intercept);

    // Project day by day starting the day after the last observation (for a
    // gapped series that is past every spanned day, not just the observation
    // count), flooring each day at zero: a declining trend must not produce
    // negative demand.
    let next_x = xs.last().copied().unwrap_or(0.0) + 1.0;
    let projected_total: f64 = (0..horizon_days)
        .map(|offset| (slope * (next_x + offset as f64) + intercept).max(0.0))
        .sum();

    let safety_stock = projected_total * (safety_multiplier - 1.0);

    ForecastOutcome::Projected(ForecastResult {
        slope,
        intercept,
        projected_total,
        safety_stock,
        total_recommended: projected_total + safety_stock,
        r_squared: r2,
        daily_velocity: daily_velocity(&xs, &ys),
        horizon_days,
    })
}

/// The engine's contribution to the pipeline's aggregate confidence, distinct
/// from R² itself.
pub fn forecast_confidence(result: &ForecastResult) -> f64 {
    result.r_squared.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeriesPoint;
    use chrono::NaiveDate;

    fn series(values: &[f64]) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| SeriesPoint {
                date: start + chrono::Days::new(i as u64),
                value: *v,
            })
            .collect();
        TimeSeries::from_points("units_sold", points).unwrap()
    }

    #[test]
    fn constant_series_is_a_perfect_flat_fit() {
        let outcome = forecast(&series(&[5.0; 30]), 30, 1.2);
        let result = outcome.projection().expect("projected");
        assert_eq!(result.slope, 0.0);
        assert_eq!(result.daily_velocity, 5.0);
        assert_eq!(result.r_squared, 1.0);
        assert!((result.projected_total - 5.0 * 30.0).abs() < 1e-9);
        assert!((result.safety_stock - result.projected_total * 0.2).abs() < 1e-9);
    }

    #[test]
    fn all_zero_series_projects_zero_with_perfect_fit() {
        let outcome = forecast(&series(&[0.0; 14]), 30, 1.5);
        let result = outcome.projection().expect("projected");
        assert_eq!(result.daily_velocity, 0.0);
        assert_eq!(result.slope, 0.0);
        assert_eq!(result.r_squared, 1.0);
        assert_eq!(result.projected_total, 0.0);
        assert_eq!(result.total_recommended, 0.0);
    }

    #[test]
    fn single_point_degrades_to_insufficient_data() {
        let outcome = forecast(&series(&[7.0]), 30, 1.2);
        match outcome {
            ForecastOutcome::InsufficientData(d) => {
                assert_eq!(d.daily_velocity, 7.0);
                assert_eq!(d.observations, 1);
                assert_eq!(d.r_squared, 0.0);
            }
            ForecastOutcome::Projected(_) => panic!("expected insufficient data"),
        }
    }

    #[test]
    fn empty_series_degrades_with_zero_velocity() {
        let empty = TimeSeries::from_points("units_sold", vec![]).unwrap();
        match forecast(&empty, 30, 1.2) {
            ForecastOutcome::InsufficientData(d) => {
                assert_eq!(d.daily_velocity, 0.0);
                assert_eq!(d.observations, 0);
            }
            ForecastOutcome::Projected(_) => panic!("expected insufficient data"),
        }
    }

    #[test]
    fn linear_trend_is_recovered_exactly() {
        let values: Vec<f64> = (0..20).map(|i| 2.0 + 3.0 * i as f64).collect();
        let result = forecast(&series(&values), 10, 1.2);
        let result = result.projection().expect("projected");
        assert!((result.slope - 3.0).abs() < 1e-9);
        assert!((result.intercept - 2.0).abs() < 1e-9);
        assert!((result.r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn declining_trend_floors_daily_demand_at_zero() {
        // Steep decline crosses zero inside the horizon.
        let values: Vec<f64> = (0..10).map(|i| 9.0 - i as f64).collect();
        let result = forecast(&series(&values), 30, 1.2);
        let result = result.projection().expect("projected");
        assert_eq!(result.projected_total, 0.0);
        assert_eq!(result.safety_stock, 0.0);
    }

    #[test]
    fn calendar_gaps_count_as_zero_activity_for_velocity() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        // 10 units on day 0 and 10 on day 4: 20 units over a 5-day span.
        let s = TimeSeries::from_points(
            "units_sold",
            vec![
                SeriesPoint { date: start, value: 10.0 },
                SeriesPoint {
                    date: start + chrono::Days::new(4),
                    value: 10.0,
                },
            ],
        )
        .unwrap();
        let result = forecast(&s, 7, 1.2);
        let result = result.projection().expect("projected");
        assert!((result.daily_velocity - 4.0).abs() < 1e-9);
    }

    #[test]
    fn gapped_series_projects_past_the_last_observed_day() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        // Observations on day 0 and day 4 fit slope 1, intercept 0; the
        // projection must start at day 5, not at the observation count.
        let s = TimeSeries::from_points(
            "units_sold",
            vec![
                SeriesPoint { date: start, value: 0.0 },
                SeriesPoint {
                    date: start + chrono::Days::new(4),
                    value: 4.0,
                },
            ],
        )
        .unwrap();
        let result = forecast(&s, 3, 1.2);
        let result = result.projection().expect("projected");
        assert!((result.slope - 1.0).abs() < 1e-9);
        assert!((result.projected_total - (5.0 + 6.0 + 7.0)).abs() < 1e-9);
    }

    #[test]
    fn safety_stock_identity_holds() {
        let values: Vec<f64> = (0..40).map(|i| 8.0 + (i % 5) as f64).collect();
        let result = forecast(&series(&values), 30, 1.2);
        let result = result.projection().expect("projected");
        assert!(
            (result.safety_stock - result.projected_total * 0.2).abs() < 1e-9,
            "safety stock must equal projected_total * (multiplier - 1)"
        );
        assert!(
            (result.total_recommended - (result.projected_total + result.safety_stock)).abs()
                < 1e-9
        );
    }
}
