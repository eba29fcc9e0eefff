pub mod context;
pub mod contract;
pub mod memory;
pub mod metrics;
pub mod remote;
pub mod types;
