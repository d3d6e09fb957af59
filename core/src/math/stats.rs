pub struct StatsHelper;

impl StatsHelper {
    /// Order-statistic median. Sorts the scratch slice in place; an even
    /// count averages the two middle values. Empty input is absent.
    pub fn median(samples: &mut [f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = samples.len();
        if n % 2 == 0 {
            Some((samples[n / 2 - 1] + samples[n / 2]) / 2.0)
        } else {
            Some(samples[(n - 1) / 2])
        }
    }

    /// Standard deviation from running sums, the form the windowed loops
    /// accumulate. Rounding can push the radicand slightly negative.
    pub fn std_dev_from_sums(sum: f64, sq_sum: f64, count: usize) -> f64 {
        if count == 0 {
            return 0.0;
        }
        let n = count as f64;
        let mean = sum / n;
        (sq_sum / n - mean * mean).max(0.0).sqrt()
    }
}
