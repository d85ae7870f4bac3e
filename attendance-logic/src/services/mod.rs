pub mod dispatch;
pub mod ingress;
pub mod scheduler;

pub use ingress::LocationIngress;
pub use scheduler::{SchedulerWorker, TaskDispatcher};
