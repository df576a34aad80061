mod labels;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use labels::{coco_label, COCO_LABELS};
pub use scripted::ScriptedModel;

#[cfg(feature = "backend-tract")]
pub use tract::TractModel;
