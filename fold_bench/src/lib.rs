pub mod analysis;
pub mod checkpoint;
pub mod config;
pub mod data_handling;
pub mod driver;
pub mod ensemble;
pub mod error;
pub mod genome;
pub mod helper_functions;
pub mod models;
pub mod options;
pub mod prediction;
pub mod scheduler;

pub use error::{PipelineError, PipelineResult};
