pub mod runner;

pub use runner::{RunMetrics, ShadowConfig, ShadowManifest, ShadowRunner};
