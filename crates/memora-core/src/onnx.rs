//! ONNX Runtime embedding service: SCRFD for face boxes and landmarks,
//! ArcFace for embeddings.
//!
//! Faces are warped onto the canonical ArcFace landmarks before
//! embedding. A detector without landmark outputs falls back to an
//! axis-aligned crop resized to the ArcFace input.

use crate::alignment::{align_face, Landmarks};
use crate::embedding::{EmbeddingError, EmbeddingService};
use crate::types::{crop_region, BoundingBox, Embedding, FaceObservation};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const DET_INPUT_SIZE: u32 = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_SCORE_THRESHOLD: f32 = 0.5;
const DET_NMS_THRESHOLD: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

const REC_INPUT_SIZE: u32 = 112;
const REC_MEAN: f32 = 127.5;
const REC_STD: f32 = 127.5;

/// Euclidean tolerance for L2-normalised ArcFace embeddings, equal to a
/// cosine similarity of 0.40: sqrt(2 - 2 * 0.40).
pub const ARCFACE_TOLERANCE: f32 = 1.095;

/// One SCRFD detection in source-frame pixels.
#[derive(Debug, Clone, Copy)]
struct Detection {
    bbox: BoundingBox,
    landmarks: Option<Landmarks>,
}

/// Scale and padding applied when fitting a frame into the detector input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (DET_INPUT_SIZE as f32 / width as f32).min(DET_INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).min(DET_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).min(DET_INPUT_SIZE);
        Self {
            scale,
            pad_x: (DET_INPUT_SIZE - new_w) / 2,
            pad_y: (DET_INPUT_SIZE - new_h) / 2,
        }
    }

    /// Map a point from detector input space back to the source frame.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

pub struct OnnxEmbedder {
    detector: Session,
    recognizer: Session,
    /// The detector also emits five-point landmarks per anchor.
    has_landmarks: bool,
}

impl OnnxEmbedder {
    /// Load the SCRFD detector and ArcFace recognizer.
    pub fn load(detector_path: &Path, recognizer_path: &Path) -> Result<Self, EmbeddingError> {
        let detector = load_session(detector_path)?;
        if detector.outputs().len() < 6 {
            return Err(EmbeddingError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                detector.outputs().len()
            )));
        }
        let has_landmarks = detector.outputs().len() >= 3 * DET_STRIDES.len();
        let recognizer = load_session(recognizer_path)?;

        tracing::info!(
            detector = %detector_path.display(),
            recognizer = %recognizer_path.display(),
            landmarks = has_landmarks,
            "embedding models loaded"
        );
        if !has_landmarks {
            tracing::warn!("detector has no landmark outputs; embedding unaligned crops");
        }
        Ok(Self {
            detector,
            recognizer,
            has_landmarks,
        })
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, EmbeddingError> {
        let letterbox = Letterbox::fit(image.width(), image.height());
        let input = detector_input(image, &letterbox);

        let outputs = self
            .detector
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let levels = DET_STRIDES.len();
        let mut detections = Vec::new();
        for (level, &stride) in DET_STRIDES.iter().enumerate() {
            // Positional layout: [scores 8/16/32, bboxes 8/16/32, (kps 8/16/32)].
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| EmbeddingError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, offsets) = outputs[level + levels]
                .try_extract_tensor::<f32>()
                .map_err(|e| EmbeddingError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let kps = if self.has_landmarks {
                let (_, kps) = outputs[level + 2 * levels]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| EmbeddingError::InferenceFailed(format!("kps stride {stride}: {e}")))?;
                Some(kps)
            } else {
                None
            };
            detections.extend(decode_level(scores, offsets, kps, stride, &letterbox));
        }

        Ok(suppress_overlaps(detections, DET_NMS_THRESHOLD))
    }

    /// Embed one detection from `image`, aligned when landmarks are known.
    fn embed(&mut self, image: &RgbImage, detection: &Detection) -> Result<Option<Embedding>, EmbeddingError> {
        let aligned = detection.landmarks.and_then(|lm| align_face(image, &lm));
        let face = match aligned {
            Some(face) => face,
            None => match crop_region(image, &detection.bbox) {
                Some(crop) => {
                    image::imageops::resize(&crop, REC_INPUT_SIZE, REC_INPUT_SIZE, FilterType::Triangle)
                }
                None => return Ok(None),
            },
        };
        let input = normalized_tensor(&face, REC_MEAN, REC_STD);

        let outputs = self
            .recognizer
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(EmbeddingError::InferenceFailed("empty embedding".into()));
        }
        Ok(Some(Embedding::new(l2_normalize(raw))))
    }
}

impl EmbeddingService for OnnxEmbedder {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<FaceObservation>, EmbeddingError> {
        let detections = self.detect(image)?;
        let mut observations = Vec::with_capacity(detections.len());
        for detection in detections {
            if let Some(embedding) = self.embed(image, &detection)? {
                observations.push(FaceObservation {
                    bbox: detection.bbox,
                    embedding,
                });
            }
        }
        Ok(observations)
    }
}

fn load_session(path: &Path) -> Result<Session, EmbeddingError> {
    if !path.exists() {
        return Err(EmbeddingError::ModelNotFound(path.display().to_string()));
    }
    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(path)?;
    Ok(session)
}

/// Letterbox `image` into a square NCHW tensor, padding with the mean.
fn detector_input(image: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).clamp(1, DET_INPUT_SIZE);
    let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).clamp(1, DET_INPUT_SIZE);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = DET_INPUT_SIZE as usize;
    // Zero after normalization is exactly the mean-valued padding.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + letterbox.pad_x) as usize;
        let ty = (y + letterbox.pad_y) as usize;
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - DET_MEAN) / DET_STD;
        }
    }
    tensor
}

fn normalized_tensor(image: &RgbImage, mean: f32, std: f32) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - mean) / std;
        }
    }
    tensor
}

/// Decode anchor-free SCRFD outputs for one stride level. `kps` holds
/// five landmark offsets per anchor when the model provides them.
fn decode_level(
    scores: &[f32],
    offsets: &[f32],
    kps: Option<&[f32]>,
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<Detection> {
    let grid = DET_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * DET_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= DET_SCORE_THRESHOLD {
            continue;
        }
        let Some(off) = offsets.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / DET_ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * s;
        let ay = (cell / grid) as f32 * s;

        let (x1, y1) = letterbox.unmap(ax - off[0] * s, ay - off[1] * s);
        let (x2, y2) = letterbox.unmap(ax + off[2] * s, ay + off[3] * s);
        let landmarks = kps
            .and_then(|kps| kps.get(idx * 10..idx * 10 + 10))
            .map(|k| std::array::from_fn(|i| letterbox.unmap(ax + k[2 * i] * s, ay + k[2 * i + 1] * s)));

        detections.push(Detection {
            bbox: BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            },
            landmarks,
        });
    }
    detections
}

/// Greedy non-maximum suppression, highest confidence first.
fn suppress_overlaps(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.bbox
            .confidence
            .partial_cmp(&a.bbox.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept.iter().all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
