//! LCD panels: image rendering, chunked streaming and touch input.

pub mod engine;
pub mod packet;
pub mod render;
pub mod touch;

pub use engine::LcdServiceProvider;
pub use render::Renderer;
