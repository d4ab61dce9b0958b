//! Skin type model components

pub mod classifier;
pub mod loader;
pub mod network;

pub use classifier::{Classifier, Predictor};
pub use loader::{select_device, LoadedNetwork, Locator, ModelLoader, WeightSource};
pub use network::SkinTypeNetwork;
