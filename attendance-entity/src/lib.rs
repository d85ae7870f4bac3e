pub mod entities;
pub mod events;
pub mod locations;
pub mod participants;
pub mod scheduler_tasks;
pub mod sea_orm_active_enums;

pub mod prelude;
