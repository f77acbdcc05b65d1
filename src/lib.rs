pub mod chart;
pub mod chat;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod interaction;
pub mod llm_interaction;
pub mod query;
pub mod refiner;
pub mod web_server;

pub use interaction::{run_interaction, AppContext, InteractionReport};
