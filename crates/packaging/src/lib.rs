pub mod image_builder;
pub mod templates;
pub mod workspace;

pub use image_builder::*;
pub use workspace::*;
