use std::sync::Arc;

use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{
    Metric, MetricAttributes, MetricMetadata, MetricName, Numeric, NumericAttributes, NumericEntry,
    SerializedEntry,
};

/// Codebook usage perplexity of a batch, between 1 and the codebook size.
#[derive(Clone)]
pub struct PerplexityMetric {
    name: MetricName,
    state: NumericMetricState,
}

pub struct PerplexityInput {
    pub value: f32,
}

impl PerplexityMetric {
    pub fn new() -> Self {
        Self {
            name: Arc::new("Code Perplexity".to_string()),
            state: NumericMetricState::default(),
        }
    }
}

impl Default for PerplexityMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for PerplexityMetric {
    type Input = PerplexityInput;

    fn name(&self) -> MetricName {
        self.name.clone()
    }

    fn attributes(&self) -> MetricAttributes {
        NumericAttributes {
            unit: None,
            higher_is_better: true,
        }
        .into()
    }

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> SerializedEntry {
        self.state.update(
            item.value as f64,
            1,
            FormatOptions::new(self.name()).precision(3),
        )
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl Numeric for PerplexityMetric {
    fn value(&self) -> NumericEntry {
        self.state.current_value()
    }

    fn running_value(&self) -> NumericEntry {
        self.state.running_value()
    }
}

#[cfg(test)]
mod tests {
    use burn::data::dataloader::Progress;

    use super::*;

    fn metadata(iteration: usize) -> MetricMetadata {
        MetricMetadata {
            progress: Progress {
                items_processed: iteration,
                items_total: 10,
            },
            epoch: 1,
            epoch_total: 1,
            iteration,
            lr: None,
        }
    }

    #[test]
    fn running_value_is_the_mean_since_clear() {
        let mut metric = PerplexityMetric::new();

        metric.update(&PerplexityInput { value: 4.0 }, &metadata(1));
        metric.update(&PerplexityInput { value: 8.0 }, &metadata(2));

        assert_eq!(metric.value().current(), 8.0);
        assert_eq!(metric.running_value().current(), 6.0);

        metric.clear();
        metric.update(&PerplexityInput { value: 2.0 }, &metadata(3));

        assert_eq!(metric.running_value().current(), 2.0);
    }
}
