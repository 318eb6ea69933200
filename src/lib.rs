pub mod allocate;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod error;
pub mod milp;
pub mod patterns;
pub mod request;
pub mod scale;
pub mod solver;
pub mod types;

pub use config::EngineConfig;
pub use error::{OptimizeError, Result};
pub use request::{ErrorResponse, OptimizeRequest, OptimizeResponse};
pub use solver::Solver;
