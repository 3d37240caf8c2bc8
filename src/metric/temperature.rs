use std::sync::Arc;

use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{
    Metric, MetricAttributes, MetricMetadata, MetricName, Numeric, NumericAttributes, NumericEntry,
    SerializedEntry,
};

#[derive(Clone)]
pub struct TemperatureMetric {
    name: MetricName,
    state: NumericMetricState,
}

pub struct TemperatureInput {
    pub value: f32,
}

impl TemperatureMetric {
    pub fn new() -> Self {
        Self {
            name: Arc::new("Gumbel Temperature".to_string()),
            state: NumericMetricState::default(),
        }
    }
}

impl Default for TemperatureMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for TemperatureMetric {
    type Input = TemperatureInput;

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
        self.state.update(item.value as f64, 1, FormatOptions::new(self.name()).precision(4))
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl Numeric for TemperatureMetric {
    fn value(&self) -> NumericEntry {
        self.state.current_value()
    }

    fn running_value(&self) -> NumericEntry {
        self.state.running_value()
    }
}
