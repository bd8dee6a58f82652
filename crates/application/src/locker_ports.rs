mod alert;
mod clock;
mod liveness;
mod queue;
mod store;

pub use alert::{AlertSink, EmailService};
pub use clock::{Clock, SystemClock};
pub use liveness::{LivenessOracle, RequestLog};
pub use queue::{DEFAULT_QUEUE, DeliveredTask, QueuedTask, TaskQueue};
pub use store::{EntityStore, EntityWrite, ExpectedVersion, VersionedEntity, WriteBatch};
