mod matcher;
mod resolver;

pub use matcher::{ScopeMatcher, matches};
pub use resolver::{ExclusionRules, resolve};
