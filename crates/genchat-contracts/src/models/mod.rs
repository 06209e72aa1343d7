mod registry;
mod selectors;

pub use registry::{Capability, ModelRoute, ModelTable, PerformanceMode};
pub use selectors::{ModelSelection, ModelSelector};
