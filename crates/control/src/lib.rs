pub mod lifecycle;
pub mod orchestrator;
pub mod reconciler;
pub mod store;

pub use lifecycle::*;
pub use orchestrator::*;
pub use reconciler::*;
pub use store::*;
