pub mod config;
pub mod container;
pub mod error;
pub mod naming;

pub use config::*;
pub use container::*;
pub use error::*;
pub use naming::*;
