pub mod session;
pub mod stage_output;

pub use session::*;
pub use stage_output::*;
