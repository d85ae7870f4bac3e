pub mod entities;
pub mod events;
pub mod locations;
pub mod participants;
pub mod scheduler_tasks;

pub use entities::{NewTenant, Tenant, UpdateTenant};
pub use events::{Event, EventStatus, NewEvent, UpdateEvent};
pub use locations::{NewPing, Ping};
pub use participants::{NewParticipant, Participant, ParticipantStatus, UpdateParticipant};
pub use scheduler_tasks::{NewTask, Task, TaskStatus};
