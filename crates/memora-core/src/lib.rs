//! memora-core: identity matching and unknown-face capture.
//!
//! Each frame is reduced to face embeddings, matched against the registry
//! of known people, and every face left unmatched is followed across frames
//! until it has been seen long enough to offer it for registration.

pub mod alignment;
pub mod annotate;
pub mod capture;
pub mod embedding;
pub mod matcher;
pub mod onnx;
pub mod pending;
pub mod pipeline;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod tracker;
pub mod types;

pub use embedding::{EmbeddingError, EmbeddingService};
pub use matcher::{EuclideanMatcher, IdentityMatch, Matcher};
pub use onnx::OnnxEmbedder;
pub use pending::{PendingError, PendingRegistration, PendingRegistry};
pub use pipeline::{CycleReport, FrameProcessor, ProcessorConfig};
pub use registry::{IdentityRegistry, RegistryError};
pub use snapshot::{DetectionSummary, Snapshot, SnapshotPublisher};
pub use state::SharedState;
pub use store::{IdentityStore, NewIdentity, StoreError};
pub use tracker::{TrackManager, TrackState, TrackerConfig};
pub use types::{BoundingBox, Crop, Embedding, FaceObservation, KnownIdentity};
