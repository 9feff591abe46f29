pub mod disk;
pub mod page;

mod engine;

pub use engine::*;
