use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::InMemDataset;
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// One image as a channel-major `C x H x W` row, values in `[-1, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageItem {
    pub pixels: Vec<f32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageItem {
    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    fn check(&self, expected: [usize; 3]) -> Result<()> {
        let [channels, height, width] = self.shape();

        if self.shape() != expected || self.pixels.len() != channels * height * width {
            return Err(Error::shape_mismatch(
                expected,
                (self.shape(), self.pixels.len()),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// B x C x H x W
    pub images: Tensor<B, 4>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageBatcher;

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let images = items
            .into_iter()
            .map(|item| {
                let shape = item.shape();
                Tensor::<B, 3>::from_data(TensorData::new(item.pixels, shape), device)
            })
            .collect();

        ImageBatch {
            images: Tensor::stack(images, 0),
        }
    }
}

/// Loads JSON rows of [`ImageItem`] and checks every row against `shape`.
pub fn load_rows<P: AsRef<Path>>(path: P, shape: [usize; 3]) -> Result<InMemDataset<ImageItem>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut items = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let item: ImageItem = serde_json::from_str(&line)?;
        item.check(shape)?;
        items.push(item);
    }

    info!(path = %path.as_ref().display(), items = items.len(), "loaded image rows");

    Ok(InMemDataset::new(items))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use burn::data::dataset::Dataset;

    use super::*;

    fn item(value: f32) -> ImageItem {
        ImageItem {
            pixels: vec![value; 2 * 2],
            channels: 1,
            height: 2,
            width: 2,
        }
    }

    fn write_rows(name: &str, rows: &[String]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("vqgan-{name}-{}.jsonl", std::process::id()));
        let mut file = File::create(&path).unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        path
    }

    #[test]
    fn batches_are_channel_major() {
        let device = NdArrayDevice::Cpu;
        let batch: ImageBatch<NdArray> = ImageBatcher.batch(vec![item(0.5), item(-1.0)], &device);

        assert_eq!(batch.images.dims(), [2, 1, 2, 2]);
        let values = batch.images.to_data().iter::<f32>().collect::<Vec<_>>();
        assert_eq!(values, vec![0.5, 0.5, 0.5, 0.5, -1.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn loads_rows_and_skips_blank_lines() {
        let rows = vec![
            serde_json::to_string(&item(0.0)).unwrap(),
            String::new(),
            serde_json::to_string(&item(1.0)).unwrap(),
        ];
        let path = write_rows("ok", &rows);

        let dataset = load_rows(&path, [1, 2, 2]).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.get(1).unwrap().pixels, vec![1.0; 4]);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let mut bad = item(0.0);
        bad.pixels.pop();
        let path = write_rows("bad", &[serde_json::to_string(&bad).unwrap()]);

        let result = load_rows(&path, [1, 2, 2]);

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        std::fs::remove_file(path).unwrap();
    }
}
