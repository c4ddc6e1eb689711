mod admin;
mod health_check;
mod helpers;
mod subscriptions;

pub use admin::*;
pub use health_check::*;
pub use helpers::*;
pub use subscriptions::*;
