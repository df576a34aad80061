//! Object detection: model capability, inference adapter and suppression.
//!
//! Data flows model -> `InferenceAdapter` (confidence filter, axis flip) ->
//! `nms::suppress_candidates` -> `Detection`s. Nothing here is fatal: a
//! missing or failing model yields an empty list.

mod adapter;
pub mod backends;
mod model;
pub mod nms;
mod result;

pub use adapter::{InferenceAdapter, DEFAULT_IOU_THRESHOLD};
pub use backends::ScriptedModel;
pub use model::{DetectionModel, ModelOutput, VerticalOrigin};
pub use nms::{suppress, suppress_candidates};
pub use result::{Detection, DetectionId, RawCandidate};
