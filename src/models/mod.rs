//! Data models

mod pool;
mod state;

pub use pool::*;
pub use state::*;
