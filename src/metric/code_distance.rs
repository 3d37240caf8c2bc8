use std::sync::Arc;

use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{
    Metric, MetricAttributes, MetricMetadata, MetricName, Numeric, NumericAttributes, NumericEntry,
    SerializedEntry,
};

/// Mean squared distance between encoder outputs and their nearest codebook rows.
#[derive(Clone)]
pub struct CodeDistanceMetric {
    name: MetricName,
    state: NumericMetricState,
}

pub struct CodeDistanceInput {
    pub value: f32,
    pub batch_size: usize,
}

impl CodeDistanceMetric {
    pub fn new() -> Self {
        Self {
            name: Arc::new("Mean Code Distance".to_string()),
            state: NumericMetricState::default(),
        }
    }
}

impl Default for CodeDistanceMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for CodeDistanceMetric {
    type Input = CodeDistanceInput;

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
        self.state.update(
            item.value as f64,
            item.batch_size,
            FormatOptions::new(self.name()).precision(4),
        )
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl Numeric for CodeDistanceMetric {
    fn value(&self) -> NumericEntry {
        self.state.current_value()
    }

    fn running_value(&self) -> NumericEntry {
        self.state.running_value()
    }
}
