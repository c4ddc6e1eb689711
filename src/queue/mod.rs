mod builder;
mod dispatcher;
mod model;

pub use builder::{BlockedNotification, BuildReport, QueueBuilder};
pub use dispatcher::{BatchOutcome, DispatchError, DispatchReport, Dispatcher};
pub use model::{
    Batch, DispatchState, QUEUE_TTL_HOURS, Queue, QueueState, QueuedNotification, RenderedEmail,
    partition,
};
