use std::fs::{self, File};
use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::Dataset;
use burn::module::Module;
use burn::optim::{AdamConfig, Optimizer};
use burn::prelude::Backend;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{Adaptor, LossMetric, Metric, MetricMetadata, Numeric, NumericEntry};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::{ImageBatcher, ImageItem};
use crate::error::{Error, Result};
use crate::metric::{
    AdaptiveWeightMetric, CodeDistanceInput, CodeDistanceMetric, DiscriminatorLossInput,
    DiscriminatorLossMetric, GradientNormMetric, PerplexityMetric, TemperatureInput, TemperatureMetric,
};
use crate::model::discriminator::Discriminator;
use crate::model::autoencoder::VqAutoEncoder;
use crate::task::{StepStats, TrainStepOutput, VqGan, VqGanConfig};

#[derive(Config, Debug)]
pub struct TrainConfig {
    pub model: VqGanConfig,
    /// Learning rate per sample; both optimizers use `base_lr * batch_size`.
    #[config(default = 4.5e-6)]
    pub base_lr: f64,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 1000001)]
    pub steps: u64,
    #[config(default = 10)]
    pub log_every: u64,
    #[config(default = 1000)]
    pub checkpoint_every: u64,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1)]
    pub num_workers: usize,
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;

        if self.batch_size == 0 || self.log_every == 0 || self.checkpoint_every == 0 {
            return Err(Error::config("batch size, log and checkpoint intervals must be positive"));
        }

        Ok(())
    }

    pub fn lr(&self) -> f64 {
        self.base_lr * self.batch_size as f64
    }

    /// `C x H x W` of the images the model expects.
    pub fn image_shape(&self) -> [usize; 3] {
        let encoder = &self.model.autoencoder.encoder;
        [encoder.in_channels, encoder.resolution, encoder.resolution]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StepRecord {
    step: u64,
}

/// Saves and restores both modules and both optimizer states under `<out>/checkpoints`.
pub struct Checkpointer {
    dir: PathBuf,
    recorder: CompactRecorder,
}

impl Checkpointer {
    pub fn new(out_dir: &Path) -> Result<Self> {
        fs::create_dir_all(out_dir.join("checkpoints"))?;

        Ok(Self {
            dir: out_dir.to_path_buf(),
            recorder: CompactRecorder::new(),
        })
    }

    fn path(&self, name: &str, step: u64) -> PathBuf {
        self.dir.join("checkpoints").join(format!("{name}-{step}"))
    }

    fn step_file(&self) -> PathBuf {
        self.dir.join("step.json")
    }

    /// Step of the last completed checkpoint, if any.
    pub fn latest(&self) -> Result<Option<u64>> {
        let path = self.step_file();
        if !path.exists() {
            return Ok(None);
        }

        let record: StepRecord = serde_json::from_reader(File::open(path)?)?;

        Ok(Some(record.step))
    }

    pub fn save<B, OA, OD>(&self, step: u64, model: &VqGan<B>, ae_optim: &OA, disc_optim: &OD) -> Result<()>
    where
        B: AutodiffBackend,
        OA: Optimizer<VqAutoEncoder<B>, B>,
        OD: Optimizer<Discriminator<B>, B>,
    {
        model.autoencoder.clone().save_file(self.path("ae", step), &self.recorder)?;
        model.discriminator.clone().save_file(self.path("discriminator", step), &self.recorder)?;
        Recorder::<B>::record(&self.recorder, ae_optim.to_record(), self.path("ae_optim", step))?;
        Recorder::<B>::record(&self.recorder, disc_optim.to_record(), self.path("disc_optim", step))?;

        // step.json only ever names a complete checkpoint
        serde_json::to_writer(File::create(self.step_file())?, &StepRecord { step })?;

        info!(step, dir = %self.dir.display(), "saved checkpoint");

        Ok(())
    }

    pub fn load<B, OA, OD>(
        &self,
        step: u64,
        mut model: VqGan<B>,
        ae_optim: OA,
        disc_optim: OD,
        device: &B::Device,
    ) -> Result<(VqGan<B>, OA, OD)>
    where
        B: AutodiffBackend,
        OA: Optimizer<VqAutoEncoder<B>, B>,
        OD: Optimizer<Discriminator<B>, B>,
    {
        model.autoencoder = model
            .autoencoder
            .load_file(self.path("ae", step), &self.recorder, device)?;
        model.discriminator = model
            .discriminator
            .load_file(self.path("discriminator", step), &self.recorder, device)?;

        let ae_optim = ae_optim.load_record(Recorder::<B>::load(&self.recorder, self.path("ae_optim", step), device)?);
        let disc_optim =
            disc_optim.load_record(Recorder::<B>::load(&self.recorder, self.path("disc_optim", step), device)?);

        info!(step, dir = %self.dir.display(), "resumed from checkpoint");

        Ok((model, ae_optim, disc_optim))
    }
}

/// Running statistics between two log lines.
struct TrainMetrics<B: Backend> {
    loss: LossMetric<B>,
    perplexity: PerplexityMetric,
    adaptive_weight: AdaptiveWeightMetric,
    gradient_norm: GradientNormMetric,
    temperature: TemperatureMetric,
    code_distance: CodeDistanceMetric,
    discriminator_loss: DiscriminatorLossMetric,
    g_loss_sum: f64,
    l1_sum: f64,
    perceptual_sum: f64,
    count: usize,
}

impl<B: Backend> TrainMetrics<B> {
    fn new() -> Self {
        Self {
            loss: LossMetric::new(),
            perplexity: PerplexityMetric::new(),
            adaptive_weight: AdaptiveWeightMetric::new(),
            gradient_norm: GradientNormMetric::new(),
            temperature: TemperatureMetric::new(),
            code_distance: CodeDistanceMetric::new(),
            discriminator_loss: DiscriminatorLossMetric::new(),
            g_loss_sum: 0.0,
            l1_sum: 0.0,
            perceptual_sum: 0.0,
            count: 0,
        }
    }

    fn update(&mut self, stats: &StepStats<B>, metadata: &MetricMetadata) {
        self.loss.update(&stats.adapt(), metadata);
        self.perplexity.update(&stats.adapt(), metadata);
        self.adaptive_weight.update(&stats.adapt(), metadata);
        self.gradient_norm.update(&stats.adapt(), metadata);

        let temperature: Option<TemperatureInput> = stats.adapt();
        if let Some(temperature) = temperature {
            self.temperature.update(&temperature, metadata);
        }
        let code_distance: Option<CodeDistanceInput> = stats.adapt();
        if let Some(code_distance) = code_distance {
            self.code_distance.update(&code_distance, metadata);
        }
        let d_loss: Option<DiscriminatorLossInput> = stats.adapt();
        if let Some(d_loss) = d_loss {
            self.discriminator_loss.update(&d_loss, metadata);
        }

        self.g_loss_sum += stats.g_loss as f64;
        self.l1_sum += stats.l1 as f64;
        self.perceptual_sum += stats.perceptual as f64;
        self.count += 1;
    }

    fn log(&mut self, step: u64) {
        let count = self.count.max(1) as f64;
        let d_loss = (self.discriminator_loss_count() > 0)
            .then(|| self.discriminator_loss.running_value().current());
        let temperature = (self.temperature_count() > 0).then(|| self.temperature.value().current());
        let code_distance = (self.code_distance_count() > 0)
            .then(|| self.code_distance.running_value().current());

        info!(
            step,
            loss = self.loss.running_value().current(),
            g_loss = self.g_loss_sum / count,
            d_loss = ?d_loss,
            l1 = self.l1_sum / count,
            perceptual = self.perceptual_sum / count,
            perplexity = self.perplexity.running_value().current(),
            d_weight = self.adaptive_weight.running_value().current(),
            grad_norm = self.gradient_norm.running_value().current(),
            temperature = ?temperature,
            code_distance = ?code_distance,
            "train",
        );

        self.clear();
    }

    fn discriminator_loss_count(&self) -> usize {
        count_of(self.discriminator_loss.running_value())
    }

    fn temperature_count(&self) -> usize {
        count_of(self.temperature.running_value())
    }

    fn code_distance_count(&self) -> usize {
        count_of(self.code_distance.running_value())
    }

    fn clear(&mut self) {
        self.loss.clear();
        self.perplexity.clear();
        self.adaptive_weight.clear();
        self.gradient_norm.clear();
        self.temperature.clear();
        self.code_distance.clear();
        self.discriminator_loss.clear();
        self.g_loss_sum = 0.0;
        self.l1_sum = 0.0;
        self.perceptual_sum = 0.0;
        self.count = 0;
    }
}

fn count_of(entry: NumericEntry) -> usize {
    match entry {
        NumericEntry::Value(_) => 1,
        NumericEntry::Aggregated { count, .. } => count,
    }
}

/// Trains the autoencoder and discriminator until `config.steps`, resuming from the latest
/// checkpoint under `out_dir` when there is one.
///
/// A step whose forward pass hits non-finite values is skipped without touching either
/// optimizer; every other error ends training.
pub fn train<B: AutodiffBackend>(
    config: &TrainConfig,
    dataset: impl Dataset<ImageItem> + 'static,
    out_dir: &Path,
    device: B::Device,
) -> Result<VqGan<B>> {
    config.validate()?;
    if dataset.is_empty() {
        return Err(Error::config("training set is empty"));
    }

    let checkpointer = Checkpointer::new(out_dir)?;
    config.save(out_dir.join("config.json"))?;

    B::seed(&device, config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let adam = AdamConfig::new().with_epsilon(1e-8);
    let model = config.model.init::<B>(&device)?;
    let ae_optim = adam.init::<B, VqAutoEncoder<B>>();
    let disc_optim = adam.init::<B, Discriminator<B>>();

    let (mut model, mut ae_optim, mut disc_optim, mut step) = match checkpointer.latest()? {
        Some(saved) => {
            let (model, ae_optim, disc_optim) = checkpointer.load(saved, model, ae_optim, disc_optim, &device)?;
            (model, ae_optim, disc_optim, saved + 1)
        }
        None => (model, ae_optim, disc_optim, 0),
    };

    let items_total = dataset.len();
    let loader = DataLoaderBuilder::new(ImageBatcher)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .set_device(device.clone())
        .build(dataset);

    let lr = config.lr();
    let mut metrics = TrainMetrics::<B::InnerBackend>::new();
    let mut epoch = 0;

    info!(
        step,
        steps = config.steps,
        lr,
        items = items_total,
        quantizer = %config.model.autoencoder.quantizer.kind,
        "starting training"
    );

    while step < config.steps {
        epoch += 1;
        let mut iterator = loader.iter();

        while let Some(batch) = iterator.next() {
            if step >= config.steps {
                break;
            }

            let TrainStepOutput {
                autoencoder_grads,
                discriminator_grads,
                stats,
            } = match model.train_step(batch.images, step, &mut rng) {
                Ok(output) => output,
                Err(Error::NonFinite { tensor, .. }) => {
                    warn!(step, tensor, "skipping step");
                    step += 1;
                    continue;
                }
                Err(error) => return Err(error),
            };

            model.autoencoder = ae_optim.step(lr, model.autoencoder, autoencoder_grads);
            if let Some(grads) = discriminator_grads {
                model.discriminator = disc_optim.step(lr, model.discriminator, grads);
            }

            let metadata = MetricMetadata {
                progress: iterator.progress(),
                epoch,
                epoch_total: epoch,
                iteration: step as usize,
                lr: Some(lr),
            };
            metrics.update(&stats, &metadata);

            if step % config.log_every == 0 {
                metrics.log(step);
            }
            if step > 0 && step % config.checkpoint_every == 0 {
                checkpointer.save(step, &model, &ae_optim, &disc_optim)?;
            }

            step += 1;
        }
    }

    info!(step, "training finished");

    Ok(model)
}
