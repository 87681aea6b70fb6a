//! TorchScript implementations of the marking models.
//!
//! Expected module contracts:
//! - detector: input `[1, 4, S, S]` float in `0..1` (R, G, B, difference),
//!   output `[1, 4 + classes, N]` with centre-x, centre-y, width, height in
//!   input pixels followed by per-class scores.
//! - classifier: input `[1, 3, C, C]` float in `0..1`, output `[1, classes]`.
//! - segmenter: inputs `[1, 3, 1024, 1024]` (longest side resized to 1024,
//!   zero padded, ImageNet normalised) and `[N, 4]` boxes in that frame;
//!   output `[N, 1024, 1024]` mask logits.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::imageops::FilterType;
use image::{GrayImage, Luma, RgbImage};
use tch::{CModule, Device, Kind, Tensor};

use super::models::{BoundingBox, ColorClassifier, ObjectDetector, PromptSegmenter};
use super::morphology::FOREGROUND;
use super::DetectError;

const DETECTOR_INPUT: u32 = 640;
const CLASSIFIER_INPUT: u32 = 224;
const SEGMENTER_INPUT: u32 = 1024;
const PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

fn inference_error(err: tch::TchError) -> DetectError {
    let message = err.to_string();
    if message.contains("out of memory") {
        DetectError::OutOfMemory(message)
    } else {
        DetectError::Inference(message)
    }
}

fn load(path: &Path, device: Device) -> Result<CModule, DetectError> {
    let mut module = CModule::load_on_device(path, device)
        .map_err(|e| DetectError::Inference(format!("failed to load {}: {e}", path.display())))?;
    module.set_eval();
    Ok(module)
}

/// Planar float tensor `[1, channels, h, w]` scaled to `0..1`.
fn planar_tensor(planes: &[Vec<f32>], width: u32, height: u32, device: Device) -> Tensor {
    let data: Vec<f32> = planes.iter().flatten().copied().collect();
    Tensor::from_slice(&data)
        .view([1, planes.len() as i64, height as i64, width as i64])
        .to_device(device)
}

fn rgb_planes(image: &RgbImage) -> Vec<Vec<f32>> {
    (0..3)
        .map(|c| image.pixels().map(|p| p.0[c] as f32 / 255.0).collect())
        .collect()
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = (a.x1.min(b.x1) - a.x0.max(b.x0)).max(0.0);
    let iy = (a.y1.min(b.y1) - a.y0.max(b.y0)).max(0.0);
    let inter = ix * iy;
    let union = a.width() * a.height() + b.width() * b.height() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy non-maximum suppression over `(box, score)` pairs.
pub fn non_max_suppression(mut candidates: Vec<(BoundingBox, f32)>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut kept: Vec<BoundingBox> = Vec::new();
    for (candidate, _) in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

pub struct TorchDetector {
    module: Mutex<CModule>,
    device: Device,
    confidence: f32,
    iou_threshold: f32,
}

impl TorchDetector {
    pub fn new(path: &Path, device: Device) -> Result<Self, DetectError> {
        Ok(Self {
            module: Mutex::new(load(path, device)?),
            device,
            confidence: 0.7,
            iou_threshold: 0.5,
        })
    }
}

impl ObjectDetector for TorchDetector {
    fn detect(&self, image: &RgbImage, difference: &GrayImage) -> Result<Vec<BoundingBox>, DetectError> {
        let (w, h) = image.dimensions();
        let resized = image::imageops::resize(image, DETECTOR_INPUT, DETECTOR_INPUT, FilterType::Triangle);
        let diff = image::imageops::resize(difference, DETECTOR_INPUT, DETECTOR_INPUT, FilterType::Triangle);
        let mut planes = rgb_planes(&resized);
        planes.push(diff.pixels().map(|p| p.0[0] as f32 / 255.0).collect());
        let input = planar_tensor(&planes, DETECTOR_INPUT, DETECTOR_INPUT, self.device);

        let output = {
            let module = self
                .module
                .lock()
                .map_err(|_| DetectError::Inference("detector lock poisoned".into()))?;
            tch::no_grad(|| module.forward_ts(&[input])).map_err(inference_error)?
        };
        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(DetectError::Inference(format!("unexpected detector output shape {shape:?}")));
        }
        let rows = output
            .to_device(Device::Cpu)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous()
            .to_kind(Kind::Float);
        let rows = Vec::<Vec<f32>>::try_from(&rows).map_err(inference_error)?;

        let sx = w as f32 / DETECTOR_INPUT as f32;
        let sy = h as f32 / DETECTOR_INPUT as f32;
        let candidates = rows
            .iter()
            .filter_map(|row| {
                let score = row[4..].iter().copied().fold(f32::MIN, f32::max);
                (score >= self.confidence).then(|| {
                    let (cx, cy, bw, bh) = (row[0], row[1], row[2], row[3]);
                    let bbox = BoundingBox {
                        x0: (cx - bw / 2.0) * sx,
                        y0: (cy - bh / 2.0) * sy,
                        x1: (cx + bw / 2.0) * sx,
                        y1: (cy + bh / 2.0) * sy,
                    };
                    (bbox, score)
                })
            })
            .collect();
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

pub struct TorchClassifier {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchClassifier {
    pub fn new(path: &Path, device: Device) -> Result<Self, DetectError> {
        Ok(Self {
            module: Mutex::new(load(path, device)?),
            device,
        })
    }
}

impl ColorClassifier for TorchClassifier {
    fn classify(&self, crop: &RgbImage) -> Result<usize, DetectError> {
        let resized = image::imageops::resize(crop, CLASSIFIER_INPUT, CLASSIFIER_INPUT, FilterType::Triangle);
        let input = planar_tensor(&rgb_planes(&resized), CLASSIFIER_INPUT, CLASSIFIER_INPUT, self.device);
        let module = self
            .module
            .lock()
            .map_err(|_| DetectError::Inference("classifier lock poisoned".into()))?;
        let output = tch::no_grad(|| module.forward_ts(&[input])).map_err(inference_error)?;
        let label = output.argmax(-1, false).int64_value(&[0]);
        usize::try_from(label).map_err(|_| DetectError::Inference(format!("negative class label {label}")))
    }
}

/// Promptable segmenter with a CPU fallback when the accelerator runs out
/// of memory.
pub struct TorchSegmenter {
    path: PathBuf,
    module: Mutex<CModule>,
    device: Device,
    cpu_fallback: Mutex<Option<CModule>>,
}

impl TorchSegmenter {
    pub fn new(path: &Path, device: Device) -> Result<Self, DetectError> {
        Ok(Self {
            path: path.to_path_buf(),
            module: Mutex::new(load(path, device)?),
            device,
            cpu_fallback: Mutex::new(None),
        })
    }

    fn run(module: &CModule, device: Device, image: &Tensor, boxes: &Tensor) -> Result<Tensor, DetectError> {
        tch::no_grad(|| module.forward_ts(&[image.to_device(device), boxes.to_device(device)]))
            .map_err(inference_error)
    }
}

impl PromptSegmenter for TorchSegmenter {
    fn segment(&self, image: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<GrayImage>, DetectError> {
        if boxes.is_empty() {
            return Ok(Vec::new());
        }
        let (w, h) = image.dimensions();
        let scale = SEGMENTER_INPUT as f32 / w.max(h) as f32;
        let (rw, rh) = (
            ((w as f32 * scale).round() as u32).max(1),
            ((h as f32 * scale).round() as u32).max(1),
        );
        let resized = image::imageops::resize(image, rw, rh, FilterType::Triangle);

        let side = SEGMENTER_INPUT as usize;
        let mut planes = vec![vec![0f32; side * side]; 3];
        for (x, y, p) in resized.enumerate_pixels() {
            for c in 0..3 {
                planes[c][y as usize * side + x as usize] = (p.0[c] as f32 - PIXEL_MEAN[c]) / PIXEL_STD[c];
            }
        }
        let input = planar_tensor(&planes, SEGMENTER_INPUT, SEGMENTER_INPUT, Device::Cpu);
        let prompt: Vec<f32> = boxes
            .iter()
            .flat_map(|b| [b.x0 * scale, b.y0 * scale, b.x1 * scale, b.y1 * scale])
            .collect();
        let prompt = Tensor::from_slice(&prompt).view([boxes.len() as i64, 4]);

        let logits = {
            let module = self
                .module
                .lock()
                .map_err(|_| DetectError::Inference("segmenter lock poisoned".into()))?;
            Self::run(&module, self.device, &input, &prompt)
        };
        let logits = match logits {
            Err(DetectError::OutOfMemory(message)) if self.device != Device::Cpu => {
                tracing::warn!(error = %message, "segmentation ran out of device memory, retrying on CPU");
                let mut fallback = self
                    .cpu_fallback
                    .lock()
                    .map_err(|_| DetectError::Inference("segmenter lock poisoned".into()))?;
                if fallback.is_none() {
                    *fallback = Some(load(&self.path, Device::Cpu)?);
                }
                match fallback.as_ref() {
                    Some(module) => Self::run(module, Device::Cpu, &input, &prompt)?,
                    None => return Err(DetectError::Inference("CPU segmenter unavailable".into())),
                }
            }
            other => other?,
        };

        let masks = logits.to_device(Device::Cpu).to_kind(Kind::Float).contiguous();
        let shape = masks.size();
        if shape.len() != 3 || shape[0] != boxes.len() as i64 {
            return Err(DetectError::Inference(format!("unexpected segmenter output shape {shape:?}")));
        }
        let (mh, mw) = (shape[1] as u32, shape[2] as u32);
        let data = Vec::<f32>::try_from(&masks.view([-1])).map_err(inference_error)?;
        let plane = (mh * mw) as usize;

        Ok((0..boxes.len())
            .map(|i| {
                let logits = &data[i * plane..(i + 1) * plane];
                let padded = GrayImage::from_fn(mw, mh, |x, y| {
                    Luma([if logits[(y * mw + x) as usize] > 0.0 { FOREGROUND } else { 0 }])
                });
                let unpadded = image::imageops::crop_imm(&padded, 0, 0, rw.min(mw), rh.min(mh)).to_image();
                image::imageops::resize(&unpadded, w, h, FilterType::Nearest)
            })
            .collect())
    }
}

/// Preferred device: the first CUDA device when available.
pub fn default_device() -> Device {
    Device::cuda_if_available()
}
