pub mod archive;
pub mod coordinator;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod state_store;
pub mod worker;
