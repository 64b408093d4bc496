pub mod errors;
pub mod params;
pub mod task;

pub use errors::*;
pub use params::*;
pub use task::*;
