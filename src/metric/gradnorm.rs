use std::sync::Arc;

use burn::module::{Module, ModuleVisitor, Param};
use burn::prelude::Tensor;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{
    Metric, MetricAttributes, MetricMetadata, MetricName, Numeric, NumericAttributes, NumericEntry,
    SerializedEntry,
};

use crate::ops::{l2, ScalarExt};

/// Accumulates the squared L2 norm of every parameter gradient of a module.
pub struct GradientNorm<'a, B: AutodiffBackend> {
    pub grads: &'a B::Gradients,
    pub squared_norm: f32,
}

impl<'a, B: AutodiffBackend> GradientNorm<'a, B> {
    pub fn new(grads: &'a B::Gradients) -> Self {
        Self {
            grads,
            squared_norm: 0.0,
        }
    }

    /// Global gradient norm of `module`'s parameters.
    pub fn of<M: Module<B>>(module: &M, grads: &'a B::Gradients) -> f32 {
        let mut gradient_norm = Self::new(grads);
        module.visit(&mut gradient_norm);
        gradient_norm.squared_norm.sqrt()
    }
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = param.grad(self.grads) {
            let norm = l2(grad).scalar::<f32>();
            self.squared_norm += norm * norm;
        }
    }
}

#[derive(Clone)]
pub struct GradientNormMetric {
    name: MetricName,
    state: NumericMetricState,
}

pub struct GradientNormInput {
    pub value: f32,
}

impl GradientNormMetric {
    pub fn new() -> Self {
        Self {
            name: Arc::new("Gradient Norm".to_string()),
            state: NumericMetricState::default(),
        }
    }
}

impl Default for GradientNormMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for GradientNormMetric {
    type Input = GradientNormInput;

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

impl Numeric for GradientNormMetric {
    fn value(&self) -> NumericEntry {
        self.state.current_value()
    }

    fn running_value(&self) -> NumericEntry {
        self.state.running_value()
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::{Linear, LinearConfig};

    use super::*;

    type TestAutodiff = Autodiff<NdArray>;

    #[test]
    fn norm_over_all_parameters() {
        let device = NdArrayDevice::Cpu;
        let mut linear: Linear<TestAutodiff> = LinearConfig::new(2, 1).init(&device);
        linear.weight = Param::from_tensor(Tensor::from_floats([[1.0], [1.0]], &device));

        // d/dw sum(x w + b) = x, d/db = 1
        let input = Tensor::<TestAutodiff, 2>::from_floats([[3.0, 4.0]], &device);
        let grads = linear.forward(input).sum().backward();

        let norm = GradientNorm::of(&linear, &grads);

        assert!((norm - 26.0f32.sqrt()).abs() < 1e-5);
    }
}
