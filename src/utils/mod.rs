//! Image preprocessing, color analysis and provider selection helpers

pub mod color;
pub mod preprocessing;
pub mod providers;

pub use color::{dominant_color, dominant_color_from_path};
pub use preprocessing::ImagePreprocessor;
pub use providers::{ExecutionProviderManager, ProviderInfo};
