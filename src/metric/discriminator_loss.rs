use std::sync::Arc;

use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{
    Metric, MetricAttributes, MetricMetadata, MetricName, Numeric, NumericAttributes, NumericEntry,
    SerializedEntry,
};

/// Hinge loss of the discriminator, only fed on steps where it is trained.
#[derive(Clone)]
pub struct DiscriminatorLossMetric {
    name: MetricName,
    state: NumericMetricState,
}

pub struct DiscriminatorLossInput {
    pub value: f32,
    pub batch_size: usize,
}

impl DiscriminatorLossMetric {
    pub fn new() -> Self {
        Self {
            name: Arc::new("Discriminator Loss".to_string()),
            state: NumericMetricState::default(),
        }
    }
}

impl Default for DiscriminatorLossMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for DiscriminatorLossMetric {
    type Input = DiscriminatorLossInput;

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
            FormatOptions::new(self.name()).precision(3),
        )
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl Numeric for DiscriminatorLossMetric {
    fn value(&self) -> NumericEntry {
        self.state.current_value()
    }

    fn running_value(&self) -> NumericEntry {
        self.state.running_value()
    }
}
