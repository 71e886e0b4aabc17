pub mod mutable;
pub mod read;

pub use mutable::*;
pub use read::*;
