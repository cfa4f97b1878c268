//! Fixed-width 1-D histograms and row-balanced split search.

/// Row counts in equal-width bins over `[min, max]`. Values outside the
/// range are counted in the first or last bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    min: f64,
    max: f64,
    bin_width: f64,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn new(min: f64, max: f64, bin_width: f64) -> Self {
        let bins = ((max - min) / bin_width).ceil().max(1.0) as usize;
        Histogram {
            min,
            max,
            bin_width,
            counts: vec![0; bins],
        }
    }

    pub fn add(&mut self, x: f64) {
        let i = ((x - self.min) / self.bin_width).floor().max(0.0) as usize;
        let last = self.counts.len() - 1;
        self.counts[i.min(last)] += 1;
    }

    /// Add the counts of a histogram with the same layout.
    pub fn merge(&mut self, other: &Histogram) {
        debug_assert_eq!(self.counts.len(), other.counts.len());
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn cumulative(&self) -> CumulativeHistogram {
        let mut cum = Vec::with_capacity(self.counts.len() + 1);
        let mut sum = 0;
        cum.push(0);
        for &c in &self.counts {
            sum += c;
            cum.push(sum);
        }
        CumulativeHistogram {
            min: self.min,
            max: self.max,
            bin_width: self.bin_width,
            cum,
        }
    }
}

/// Running totals of a [`Histogram`], interpolated linearly within bins.
#[derive(Debug, Clone)]
pub struct CumulativeHistogram {
    min: f64,
    max: f64,
    bin_width: f64,
    /// `cum[i]` is the number of rows in bins `0..i`.
    cum: Vec<u64>,
}

impl CumulativeHistogram {
    pub fn total(&self) -> u64 {
        self.cum.last().copied().unwrap_or(0)
    }

    /// Estimated number of rows with a coordinate below `x`.
    pub fn rows_below(&self, x: f64) -> f64 {
        if x <= self.min {
            return 0.0;
        }
        if x >= self.max {
            return self.total() as f64;
        }
        let bins = self.cum.len() - 1;
        let i = (((x - self.min) / self.bin_width).floor() as usize).min(bins - 1);
        let frac = ((x - self.min) / self.bin_width - i as f64).clamp(0.0, 1.0);
        let (lo, hi) = (self.cum[i] as f64, self.cum[i + 1] as f64);
        lo + frac * (hi - lo)
    }

    pub fn rows_between(&self, a: f64, b: f64) -> f64 {
        (self.rows_below(b) - self.rows_below(a)).max(0.0)
    }

    /// The coordinate below which an estimated `target` rows lie.
    pub fn find_split(&self, target: f64) -> f64 {
        if target <= 0.0 {
            return self.min;
        }
        if target >= self.total() as f64 {
            return self.max;
        }
        // first running total reaching the target; cum[0] = 0 < target
        let i = self.cum.partition_point(|&c| (c as f64) < target);
        let bin = i - 1;
        let (lo, hi) = (self.cum[bin] as f64, self.cum[i] as f64);
        let frac = if hi > lo { (target - lo) / (hi - lo) } else { 0.0 };
        (self.min + (bin as f64 + frac) * self.bin_width).min(self.max)
    }
}
