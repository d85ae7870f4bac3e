//! Task dispatchers invoked by the scheduler worker.

use crate::{
    clients::whatsapp::OutboundMessenger,
    services::scheduler::TaskDispatcher,
    repository::{EventRepository, ParticipantRepository},
    types::{ParticipantStatus, Task},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const EVENT_REMINDER_TASK: &str = "event_reminder";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventReminderPayload {
    pub event_id: Uuid,
}

/// Sends a reminder template to every participant of an event that has not
/// answered yet.
pub struct ReminderDispatcher {
    events: Arc<dyn EventRepository>,
    participants: Arc<dyn ParticipantRepository>,
    messenger: Arc<dyn OutboundMessenger>,
}

impl ReminderDispatcher {
    pub fn new(
        events: Arc<dyn EventRepository>,
        participants: Arc<dyn ParticipantRepository>,
        messenger: Arc<dyn OutboundMessenger>,
    ) -> Self {
        Self {
            events,
            participants,
            messenger,
        }
    }

    async fn send_event_reminders(&self, task: &Task) -> Result<(), anyhow::Error> {
        let payload: EventReminderPayload = serde_json::from_value(task.payload.clone())?;
        let event = self.events.get(task.entity_id, payload.event_id).await?;
        let participants = self
            .participants
            .list_by_event(task.entity_id, event.id)
            .await?;

        let mut failures = 0;
        for participant in participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Pending)
        {
            let result = self
                .messenger
                .send_template(
                    &participant.phone_number,
                    "event_reminder",
                    &[
                        participant.name.clone(),
                        event.name.clone(),
                        event.start_time.format("%d/%m %H:%M").to_string(),
                    ],
                )
                .await;
            if let Err(err) = result {
                tracing::warn!(participant_id = %participant.id, error = ?err, "reminder delivery failed");
                failures += 1;
            }
        }

        if failures > 0 {
            anyhow::bail!("{failures} reminder(s) failed to deliver");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TaskDispatcher for ReminderDispatcher {
    async fn dispatch(&self, task: &Task) -> Result<(), anyhow::Error> {
        match task.task_type.as_str() {
            EVENT_REMINDER_TASK => self.send_event_reminders(task).await,
            other => anyhow::bail!("unknown task type {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clients::whatsapp::MessengerError,
        error::ServiceError,
        types::{
            Event, EventStatus, NewEvent, NewParticipant, Participant, TaskStatus, UpdateEvent,
            UpdateParticipant,
        },
    };
    use chrono::Utc;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    struct OneEvent(Event);

    #[async_trait::async_trait]
    impl EventRepository for OneEvent {
        async fn create(&self, _: Uuid, _: NewEvent) -> Result<Event, ServiceError> {
            unreachable!()
        }
        async fn get(&self, entity_id: Uuid, id: Uuid) -> Result<Event, ServiceError> {
            if self.0.entity_id == entity_id && self.0.id == id {
                Ok(self.0.clone())
            } else {
                Err(ServiceError::NotFound(format!("event {id}")))
            }
        }
        async fn list_by_entity(&self, _: Uuid) -> Result<Vec<Event>, ServiceError> {
            Ok(vec![self.0.clone()])
        }
        async fn update(&self, _: Uuid, _: Uuid, _: UpdateEvent) -> Result<Event, ServiceError> {
            unreachable!()
        }
        async fn delete(&self, _: Uuid, _: Uuid) -> Result<(), ServiceError> {
            unreachable!()
        }
        async fn transition_status(
            &self,
            _: Uuid,
            _: Uuid,
            _: EventStatus,
        ) -> Result<Event, ServiceError> {
            unreachable!()
        }
    }

    struct FixedParticipants(Vec<Participant>);

    #[async_trait::async_trait]
    impl ParticipantRepository for FixedParticipants {
        async fn create(
            &self,
            _: Uuid,
            _: Uuid,
            _: NewParticipant,
        ) -> Result<Participant, ServiceError> {
            unreachable!()
        }
        async fn batch_create(
            &self,
            _: Uuid,
            _: Uuid,
            _: Vec<NewParticipant>,
        ) -> Result<Vec<Participant>, ServiceError> {
            unreachable!()
        }
        async fn get(&self, _: Uuid, id: Uuid) -> Result<Participant, ServiceError> {
            self.0
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(format!("participant {id}")))
        }
        async fn list_by_event(
            &self,
            _: Uuid,
            event_id: Uuid,
        ) -> Result<Vec<Participant>, ServiceError> {
            Ok(self
                .0
                .iter()
                .filter(|p| p.event_id == event_id)
                .cloned()
                .collect())
        }
        async fn update(
            &self,
            _: Uuid,
            _: Uuid,
            _: UpdateParticipant,
        ) -> Result<Participant, ServiceError> {
            unreachable!()
        }
        async fn delete(&self, _: Uuid, _: Uuid) -> Result<(), ServiceError> {
            unreachable!()
        }
        async fn update_status(
            &self,
            _: Uuid,
            _: Uuid,
            _: ParticipantStatus,
        ) -> Result<Participant, ServiceError> {
            unreachable!()
        }
        async fn lookup_by_phone(
            &self,
            _: Uuid,
            _: &str,
        ) -> Result<Vec<Participant>, ServiceError> {
            unreachable!()
        }
    }

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl OutboundMessenger for RecordingMessenger {
        async fn send_text(&self, to: &str, _body: &str) -> Result<(), MessengerError> {
            self.sent.lock().push(to.to_string());
            Ok(())
        }
        async fn send_template(
            &self,
            to: &str,
            _template: &str,
            _parameters: &[String],
        ) -> Result<(), MessengerError> {
            self.sent.lock().push(to.to_string());
            Ok(())
        }
    }

    fn fixture() -> (Event, Vec<Participant>) {
        let entity_id = Uuid::new_v4();
        let event_id = Uuid::new_v4();
        let now = Utc::now();
        let event = Event {
            id: event_id,
            entity_id,
            name: "Team offsite".into(),
            description: None,
            start_time: now,
            end_time: now + chrono::Duration::hours(2),
            status: EventStatus::Scheduled,
            venue_lat: -23.5505,
            venue_lng: -46.6333,
            venue_name: None,
            created_at: now,
            updated_at: now,
        };
        let participant = |status: ParticipantStatus, phone: &str| Participant {
            id: Uuid::new_v4(),
            entity_id,
            event_id,
            name: "p".into(),
            phone_number: phone.into(),
            status,
            confirmed_at: None,
            checked_in_at: None,
            created_at: now,
            updated_at: now,
        };
        let participants = vec![
            participant(ParticipantStatus::Pending, "+5511999990001"),
            participant(ParticipantStatus::Confirmed, "+5511999990002"),
            participant(ParticipantStatus::Pending, "+5511999990003"),
        ];
        (event, participants)
    }

    #[tokio::test]
    async fn reminds_only_participants_still_pending() {
        let (event, participants) = fixture();
        let entity_id = event.entity_id;
        let event_id = event.id;
        let messenger = Arc::new(RecordingMessenger::default());
        let dispatcher = ReminderDispatcher::new(
            Arc::new(OneEvent(event)),
            Arc::new(FixedParticipants(participants)),
            messenger.clone(),
        );

        let task = Task {
            id: Uuid::new_v4(),
            entity_id,
            task_type: EVENT_REMINDER_TASK.into(),
            payload: serde_json::to_value(EventReminderPayload { event_id }).unwrap(),
            status: TaskStatus::Processing,
            scheduled_at: Utc::now(),
            retries: 0,
            max_retries: 3,
            last_error: None,
            processed_at: None,
        };
        dispatcher.dispatch(&task).await.unwrap();

        assert_eq!(
            *messenger.sent.lock(),
            vec!["+5511999990001".to_string(), "+5511999990003".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_task_types_error_instead_of_silently_passing() {
        let (event, participants) = fixture();
        let dispatcher = ReminderDispatcher::new(
            Arc::new(OneEvent(event)),
            Arc::new(FixedParticipants(participants)),
            Arc::new(RecordingMessenger::default()),
        );

        let task = Task {
            id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            task_type: "mystery".into(),
            payload: serde_json::json!({}),
            status: TaskStatus::Processing,
            scheduled_at: Utc::now(),
            retries: 0,
            max_retries: 3,
            last_error: None,
            processed_at: None,
        };
        assert!(dispatcher.dispatch(&task).await.is_err());
    }
}
