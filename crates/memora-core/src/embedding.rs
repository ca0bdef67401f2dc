use crate::types::FaceObservation;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in an image and returns one embedding per face.
///
/// Boxes are in the pixel space of the image passed in. An empty result
/// means no face was found.
pub trait EmbeddingService: Send {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<FaceObservation>, EmbeddingError>;
}
