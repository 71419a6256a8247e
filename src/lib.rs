pub mod backtest;
pub mod cache;
pub mod calibration;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod fake_pool;
pub mod features;
pub mod optimizer;
pub mod persist;
pub mod player;
pub mod scoring;
pub mod source;

pub use engine::{Engine, RecommendationRequest};
pub use error::{EngineError, Result};
