mod registry;
mod selectors;

pub use registry::{
    load_model_overrides, GuidanceRange, ModelRegistry, ModelSpec, StepRange, CAP_I2I, CAP_I2V,
    CAP_T2I, CAP_T2V, CAP_TEXT, DEFAULT_VIDEO_RESOLUTION,
};
pub use selectors::{ModelSelection, ModelSelector};
