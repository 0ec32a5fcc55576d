//! Streaming response-time statistics behind a small port.
//!
//! The engine only requires the [`Tally`] interface; the default
//! [`SampleTally`] keeps every observation for exact quantiles, which is
//! acceptable for the run lengths this engine targets.

// ---------------------------------------------------------------------------
// Tally — the statistics port
// ---------------------------------------------------------------------------

/// A streaming statistics sink. Empty tallies report 0 for every derived
/// statistic rather than failing.
pub trait Tally {
    fn add(&mut self, x: f64);
    fn count(&self) -> u64;
    fn average(&self) -> f64;
    /// Population variance. May be marginally negative through floating
    /// point cancellation; callers take `abs` before rooting it.
    fn variance(&self) -> f64;
    fn min(&self) -> f64;
    fn max(&self) -> f64;
    /// Estimate of the `q`-quantile for `q` in `(0, 1]`.
    fn quantile(&self, q: f64) -> f64;

    fn quantiles(&self, qs: &[f64]) -> Vec<f64> {
        qs.iter().map(|&q| self.quantile(q)).collect()
    }
}

/// Builds one tally per tracked series; the argument is the quantile set
/// the tally will be queried with.
pub type TallyFactory = dyn Fn(&[f64]) -> Box<dyn Tally>;

// ---------------------------------------------------------------------------
// SampleTally — exact default implementation
// ---------------------------------------------------------------------------

/// Exact statistics over all recorded samples.
pub struct SampleTally {
    samples: Vec<f64>,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl SampleTally {
    pub fn new() -> Self {
        SampleTally {
            samples: Vec::new(),
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn boxed() -> Box<dyn Tally> {
        Box::new(SampleTally::new())
    }
}

impl Default for SampleTally {
    fn default() -> Self {
        Self::new()
    }
}

impl Tally for SampleTally {
    fn add(&mut self, x: f64) {
        self.samples.push(x);
        self.sum += x;
        self.sum_sq += x * x;
        if x < self.min {
            self.min = x;
        }
        if x > self.max {
            self.max = x;
        }
    }

    fn count(&self) -> u64 {
        self.samples.len() as u64
    }

    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.sum / self.samples.len() as f64
    }

    fn variance(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let n = self.samples.len() as f64;
        let mean = self.sum / n;
        self.sum_sq / n - mean * mean
    }

    fn min(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.min
        }
    }

    fn max(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.max
        }
    }

    fn quantile(&self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable_by(f64::total_cmp);
        let idx = (q * sorted.len() as f64).ceil() as usize;
        let idx = idx.saturating_sub(1).min(sorted.len() - 1);
        sorted[idx]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
