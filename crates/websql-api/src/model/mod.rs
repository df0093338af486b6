pub mod entity;
pub mod update;

pub use entity::*;
pub use update::*;
