// ── Series buffer ──
//
// Fixed-capacity FIFO of samples with moving averages and running
// statistics. Each push completes synchronously; the owner serialises
// access.

use std::collections::VecDeque;

use super::circular::circular_stats;
use crate::model::{DatasetConfig, DatasetSample, ValueDomain};

#[derive(Debug, Clone)]
pub struct DatasetBuffer {
    samples: VecDeque<DatasetSample>,
    capacity: usize,
    period: usize,
    domain: ValueDomain,
}

impl DatasetBuffer {
    pub fn new(capacity: usize, period: usize, domain: ValueDomain) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            period: period.max(1),
            domain,
        }
    }

    pub fn for_config(config: &DatasetConfig) -> Self {
        Self::new(config.max_data_points, config.period(), config.value_domain)
    }

    /// Append a live sample and return it with its statistics.
    pub fn push(&mut self, timestamp: i64, value: f64) -> DatasetSample {
        self.append(timestamp, value);
        self.fill_running_stats();
        self.samples.back().cloned().unwrap_or_default()
    }

    /// Append historical rows in order. Moving averages are computed for
    /// every row; running statistics only for the last one.
    pub fn push_batch(&mut self, rows: impl IntoIterator<Item = (i64, f64)>) -> usize {
        let mut count = 0;
        for (timestamp, value) in rows {
            self.append(timestamp, value);
            count += 1;
        }
        if count > 0 {
            self.fill_running_stats();
        }
        count
    }

    pub fn snapshot(&self) -> Vec<DatasetSample> {
        self.samples.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&DatasetSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn period(&self) -> usize {
        self.period
    }

    // ── Private helpers ──────────────────────────────────────────────

    #[allow(clippy::as_conversions, clippy::cast_precision_loss)]
    fn append(&mut self, timestamp: i64, value: f64) {
        let len = self.samples.len();
        let (sma, ema, double_ema) = if len >= self.period {
            let k = 2.0 / (1.0 + self.period as f64);
            let previous = self.samples.back();
            let prev_ema = previous.and_then(|p| p.ema).unwrap_or(value);
            let prev_double = previous.and_then(|p| p.double_ema).unwrap_or(prev_ema);

            let ema = value * k + prev_ema * (1.0 - k);
            let ema2 = ema * k + prev_double * (1.0 - k);

            let window: f64 = self
                .samples
                .iter()
                .skip(len + 1 - self.period)
                .map(|s| s.value)
                .sum::<f64>()
                + value;
            (window / self.period as f64, ema, 2.0 * ema - ema2)
        } else {
            // Cold start: plain mean of everything so far.
            let sum = self.samples.iter().map(|s| s.value).sum::<f64>() + value;
            let mean = sum / (len + 1) as f64;
            let mean = if mean.is_normal() { mean } else { value };
            (mean, mean, mean)
        };

        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(DatasetSample {
            timestamp,
            value,
            sma: Some(sma),
            ema: Some(ema),
            double_ema: Some(double_ema),
            ..DatasetSample::default()
        });
    }

    #[allow(clippy::as_conversions, clippy::cast_precision_loss)]
    fn fill_running_stats(&mut self) {
        let values: Vec<f64> = self.samples.iter().map(|s| s.value).collect();
        let stats = match self.domain {
            ValueDomain::Scalar => {
                if values.is_empty() {
                    None
                } else {
                    let sum: f64 = values.iter().sum();
                    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    Some((sum / values.len() as f64, min, max))
                }
            }
            ValueDomain::Direction => circular_stats(&values).map(|s| (s.mean, s.min, s.max)),
        };
        if let (Some((average, min, max)), Some(last)) = (stats, self.samples.back_mut()) {
            last.running_average = Some(average);
            last.running_minimum = Some(min);
            last.running_maximum = Some(max);
        }
    }
}
