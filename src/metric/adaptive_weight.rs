use std::sync::Arc;

use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{
    Metric, MetricAttributes, MetricMetadata, MetricName, Numeric, NumericAttributes, NumericEntry,
    SerializedEntry,
};

/// Weight given to the adversarial term, 0 while the discriminator is warming up.
#[derive(Clone)]
pub struct AdaptiveWeightMetric {
    name: MetricName,
    state: NumericMetricState,
}

pub struct AdaptiveWeightInput {
    pub value: f32,
}

impl AdaptiveWeightMetric {
    pub fn new() -> Self {
        Self {
            name: Arc::new("Adaptive Weight".to_string()),
            state: NumericMetricState::default(),
        }
    }
}

impl Default for AdaptiveWeightMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for AdaptiveWeightMetric {
    type Input = AdaptiveWeightInput;

    fn name(&self) -> MetricName {
        self.name.clone()
    }

    fn attributes(&self) -> MetricAttributes {
        NumericAttributes {
            unit: None,
            higher_is_better: false,
        }
        .into()
    }

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> SerializedEntry {
        self.state.update(item.value as f64, 1, FormatOptions::new(self.name()).precision(3))
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl Numeric for AdaptiveWeightMetric {
    fn value(&self) -> NumericEntry {
        self.state.current_value()
    }

    fn running_value(&self) -> NumericEntry {
        self.state.running_value()
    }
}
