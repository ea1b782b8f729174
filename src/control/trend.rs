use std::fmt::{Display, Formatter};

use tokio::time::Instant;

use crate::config::TrendConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    /// Units of y per unit of x.
    pub slope: f64,
    pub r_squared: f64,
}

impl Display for Trend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:+.2}°C/h (r²={:.2})", self.slope, self.r_squared)
    }
}

/// Ordinary least squares line through `(x, y)` samples.
/// None with fewer than two samples, or when every x is the same.
pub fn fit_trend(samples: &[(f64, f64)]) -> Option<Trend> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean_x = samples.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = samples.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in samples {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    // A flat line through flat data is a perfect fit.
    let r_squared = if syy == 0.0 { 1.0 } else { (sxy * sxy) / (sxx * syy) };
    Some(Trend { slope, r_squared })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrendVerdict {
    Warming(Trend),
    NotWarming(Trend),
}

/// Collects reference temperatures over a stretch of continuous heating and,
/// once the stretch covers the configured window, judges whether the room is warming.
#[derive(Debug)]
pub struct TrendMonitor {
    config: TrendConfig,
    start: Option<Instant>,
    samples: Vec<(f64, f64)>,
}

impl TrendMonitor {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            start: None,
            samples: Vec::new(),
        }
    }

    /// Heating stopped: what was collected no longer describes one stretch.
    pub fn reset(&mut self) {
        self.start = None;
        self.samples.clear();
    }

    /// Record a reading taken while heating. Returns a verdict once per window.
    pub fn record(&mut self, at: Instant, temperature: f64) -> Option<TrendVerdict> {
        let start = *self.start.get_or_insert(at);
        let elapsed = at.saturating_duration_since(start);
        self.samples.push((elapsed.as_secs_f64() / 3600.0, temperature));

        if elapsed < self.config.min_window {
            return None;
        }

        let trend = fit_trend(&self.samples);
        // Next window starts from this reading.
        self.start = Some(at);
        self.samples.clear();
        self.samples.push((0.0, temperature));

        trend.map(|trend| {
            if trend.slope < self.config.min_slope_per_hour {
                TrendVerdict::NotWarming(trend)
            } else {
                TrendVerdict::Warming(trend)
            }
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
