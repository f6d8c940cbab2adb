//! Nanoswarm Core - threat correlation and automated response engine.
//!
//! Ingests security events, classifies them against a closed threat
//! taxonomy, correlates related indicators into attack chains and
//! graphs, and dispatches a swarm of nanobot response agents under a
//! confidence-gated decision policy.

pub mod baseline;
pub mod classifier;
pub mod config;
pub mod correlation;
pub mod decision;
pub mod effector;
pub mod error;
pub mod event;
pub mod nanobot;
pub mod nanoswarm;
pub mod stain;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use event::{Event, EventBus};
pub use nanoswarm::SwarmManager;
pub use stain::{Stain, StainStore, Store};

/// Initialize tracing for the library. Safe to call more than once;
/// only the first call takes effect.
pub fn setup_logging(level: Option<String>) {
    let filter = level.unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
