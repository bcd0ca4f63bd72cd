pub mod notify;
pub mod orchestrator;
pub mod payment;
pub mod pricing;
pub mod scheduler;
pub mod sync;
pub mod template;
