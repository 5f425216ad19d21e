/// Incremental mean: `avg_n = avg_{n-1} + (x_n - avg_{n-1}) / n`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverage {
  count: u64,
  mean: f64,
}

impl RunningAverage {
  pub fn record(&mut self, value: f64) {
    self.count += 1;
    self.mean += (value - self.mean) / self.count as f64;
  }

  pub fn mean(&self) -> f64 {
    self.mean
  }

  pub fn count(&self) -> u64 {
    self.count
  }
}
