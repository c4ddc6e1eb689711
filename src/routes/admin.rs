mod errors;
mod notifications;
mod queue;

pub use notifications::*;
pub use queue::*;
