pub mod crates;
pub mod recover;

pub use crates::*;
pub use recover::*;
