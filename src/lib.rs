pub mod capability;
pub mod config;
pub mod connectors;
pub mod dataset;
pub mod entity_resolver;
pub mod error;
pub mod llm;
pub mod observability;
pub mod orchestrator;
pub mod query_synth;
pub mod schema_matcher;
pub mod similarity;
pub mod warehouse;

pub use config::Settings;
pub use connectors::SourceConfig;
pub use error::{ReconError, Result};
pub use orchestrator::{ApprovalDecision, Orchestrator, ReconRequest, ReconResponse, RunStatus};
