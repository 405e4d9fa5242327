// Re-export all model types from submodules
mod intake;
mod share;

pub use intake::*;
pub use share::*;
