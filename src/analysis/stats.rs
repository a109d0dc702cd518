//! Small numeric helpers shared by scoring, chain and persistence stages.

/// A borrowed view over a series of samples.
pub struct TimeSeries<'a> {
    values: &'a [f64],
}

impl<'a> TimeSeries<'a> {
    pub fn new(values: &'a [f64]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Sum of squared deviations from the mean (unnormalised variance).
    pub fn sum_sq_dev(&self) -> f64 {
        let mean = self.mean();
        self.values.iter().map(|&x| (x - mean).powi(2)).sum()
    }

    /// Median; the mean of the two middle values for even lengths.
    pub fn median(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mut sorted = self.values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    /// First differences; one shorter than the input.
    pub fn diffs(&self) -> Vec<f64> {
        self.values.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// EWMA seeded at zero: `m = alpha*x + (1-alpha)*m`, one output per input.
    pub fn ewma(&self, alpha: f64) -> Vec<f64> {
        let mut m = 0.0;
        self.values
            .iter()
            .map(|&x| {
                m = alpha * x + (1.0 - alpha) * m;
                m
            })
            .collect()
    }
}

/// -1, 0 or 1 with a dead band of `eps` around zero.
pub fn sign_eps(x: f64, eps: f64) -> i8 {
    if x > eps {
        1
    } else if x < -eps {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let ts = TimeSeries::new(&v);
        assert_eq!(ts.mean(), 3.0);
        assert_eq!(ts.median(), 3.0);
        assert_eq!(ts.sum_sq_dev(), 10.0);
        assert_eq!(ts.diffs(), vec![1.0; 4]);
    }

    #[test]
    fn test_median_even_and_empty() {
        assert_eq!(TimeSeries::new(&[4.0, 1.0, 3.0, 2.0]).median(), 2.5);
        assert_eq!(TimeSeries::new(&[]).median(), 0.0);
    }

    #[test]
    fn test_ewma_seeded_at_zero() {
        let m = TimeSeries::new(&[1.0, 1.0]).ewma(0.5);
        assert_eq!(m, vec![0.5, 0.75]);
    }

    #[test]
    fn test_sign_eps() {
        assert_eq!(sign_eps(0.005, 0.01), 0);
        assert_eq!(sign_eps(-0.2, 0.01), -1);
        assert_eq!(sign_eps(0.2, 0.01), 1);
    }
}
