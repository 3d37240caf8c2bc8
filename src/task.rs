pub mod vqgan;

pub use vqgan::{StepStats, TrainStepOutput, VqGan, VqGanConfig};
