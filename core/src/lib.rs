#[macro_use]
pub mod types;

pub mod agency_gateway;
pub mod agent_manager;
pub mod authorization_queue;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod geo;
pub mod ledger;
pub mod operation;
pub mod response;
pub mod store;
pub mod threshold;
