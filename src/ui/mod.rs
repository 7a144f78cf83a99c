pub mod charset;
pub mod clock;
pub mod color;
pub mod format;
pub mod image;
pub mod render;
pub mod segment;
pub mod wrap;

pub use render::{RenderSession, RenderSettings};
