mod elements;
mod session;
mod stage;

pub use elements::*;
pub use session::*;
pub use stage::*;
