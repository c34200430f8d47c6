pub mod channel;
pub mod config;
pub mod errors;
pub mod inference;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod stage;
pub mod store;
