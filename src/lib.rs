pub mod audio;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod labels;
pub mod models;
pub mod pipeline;
pub mod report;

pub use error::{ClassifierError, Result};
