pub mod bus;
pub mod hub;
pub mod messages;
pub mod session;

pub use bus::EventBus;
pub use hub::{Hub, HubRunner, SessionHandle};
pub use messages::{Envelope, LocationUpdatePayload, MessageType, ParticipantPayload};
