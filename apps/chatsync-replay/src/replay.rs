//! Drives a chat repository through a fixture's scripted actions.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use chatsync_core::{
    ChatError, ChatRepository, Clock, ConversationStore, LoadMoreOutcome, ManualClock, Message,
    MessageNotification, MessageStatus, Room, StaticChannelDirectory, SubscriptionToken,
};
use chatsync_matrix::{
    InMemoryTransport, LocalEchoState, MatrixAdapter, Operation, TransportError,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::ReplayConfig,
    error::ReplayError,
    fixture::{Action, Fixture},
};

/// Simulated time that passes between two actions.
const STEP_MS: u64 = 1_000;

type Adapter = MatrixAdapter<InMemoryTransport>;
type Repo = ChatRepository<Adapter, ConversationStore, StaticChannelDirectory>;

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State of the repository once every action has run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub user_id: String,
    pub total_unread: u32,
    pub rooms: Vec<Room>,
    pub messages: BTreeMap<String, Vec<Message>>,
    pub notifications: Vec<MessageNotification>,
    pub steps: Vec<StepReport>,
}

pub struct Replay {
    adapter: Arc<Adapter>,
    repo: Repo,
    clock: Arc<ManualClock>,
    notifications: Arc<Mutex<Vec<MessageNotification>>>,
    active: Option<(String, SubscriptionToken)>,
}

impl Replay {
    pub fn new(fixture: &Fixture, config: &ReplayConfig) -> Result<Self, ReplayError> {
        let clock = Arc::new(ManualClock::new(fixture.now_ms));
        let transport = InMemoryTransport::new(&fixture.user_id, fixture.server_name())
            .with_clock(clock.clone());
        fixture.seed(&transport);

        let adapter = Arc::new(MatrixAdapter::new(
            transport,
            &config.adapter_for(&fixture.homeserver),
        )?);
        let store = Arc::new(Mutex::new(ConversationStore::new(
            config.sync.max_messages_per_room,
        )));
        let repo = ChatRepository::new(
            adapter.clone(),
            store,
            StaticChannelDirectory::new(fixture.catalog.clone()),
            config.sync.clone(),
        )
        .with_clock(clock.clone());

        let notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = notifications.clone();
        repo.subscribe_to_all_messages(Arc::new(move |notification: MessageNotification| {
            info!(
                room_id = %notification.room_id,
                sender = %notification.sender_name,
                "notification"
            );
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification);
        }));

        Ok(Self {
            adapter,
            repo,
            clock,
            notifications,
            active: None,
        })
    }

    /// Run every action in order. Action failures are recorded, not fatal.
    pub async fn run(mut self, fixture: &Fixture) -> Report {
        let mut steps = Vec::with_capacity(fixture.actions.len());
        for (index, action) in fixture.actions.iter().enumerate() {
            let result = self.apply(action).await;
            let step = match result {
                Ok(outcome) => {
                    info!(index, action = action.name(), %outcome, "step done");
                    StepReport {
                        index,
                        action: action.name(),
                        outcome: Some(outcome),
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(index, action = action.name(), error = %err, "step failed");
                    StepReport {
                        index,
                        action: action.name(),
                        outcome: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            steps.push(step);
            self.clock.advance(STEP_MS);
        }
        self.report(fixture, steps)
    }

    async fn apply(&mut self, action: &Action) -> Result<String, ChatError> {
        let transport = self.adapter.transport();
        match action {
            Action::OpenRoom { room_id } => {
                if let Some((_, token)) = self.active.take() {
                    self.repo.unsubscribe(token);
                }
                let token = self.repo.subscribe_to_room(room_id);
                self.active = Some((room_id.clone(), token));
                let loaded = self.repo.open_room(room_id).await?;
                Ok(format!("loaded {loaded} messages"))
            }
            Action::Send { room_id, text } => {
                let event_id = self.repo.send_message(room_id, text).await?;
                Ok(format!("sent {event_id}"))
            }
            Action::SendFailing { room_id, text } => {
                transport.fail_next(
                    Operation::Send,
                    TransportError::unreachable("scripted send failure"),
                );
                let event_id = self.repo.send_message(room_id, text).await?;
                Ok(format!("sent {event_id}"))
            }
            Action::LoadMore { room_id } => match self.repo.load_more_messages(room_id).await? {
                LoadMoreOutcome::Loaded {
                    added,
                    has_more,
                    source,
                } => Ok(format!("added {added} from {source:?}, has_more={has_more}")),
                LoadMoreOutcome::AlreadyLoading => Ok("already loading".to_owned()),
            },
            Action::Incoming {
                room_id,
                sender,
                body,
                age_ms,
            } => {
                let ts = self.clock.now_ms().saturating_sub(*age_ms);
                let event_id = transport.inject_text(room_id, sender, body, ts);
                Ok(format!("delivered {event_id}"))
            }
            Action::LocalEcho {
                room_id,
                body,
                failed,
            } => {
                let state = if *failed {
                    LocalEchoState::NotSent
                } else {
                    LocalEchoState::Sending
                };
                transport.push_local_echo(room_id, body, self.clock.now_ms(), state);
                Ok(format!("echoed {state:?}"))
            }
            Action::SyncChannels => {
                let count = self.repo.sync_channels().await?;
                Ok(format!("{count} channels"))
            }
            Action::SyncDirectMessages => {
                let count = self.repo.sync_direct_messages().await?;
                Ok(format!("{count} direct chats"))
            }
            Action::MarkRead { room_id } => {
                self.repo.mark_as_read(room_id).await?;
                Ok("read".to_owned())
            }
            Action::LeaveRoom { room_id } => {
                self.repo.leave_room(room_id).await?;
                if let Some((active, token)) = self.active.take() {
                    if active == *room_id {
                        self.repo.unsubscribe(token);
                        self.repo.close_room();
                    } else {
                        self.active = Some((active, token));
                    }
                }
                Ok("left".to_owned())
            }
            Action::Retry { room_id } => {
                let failed: Vec<String> = self
                    .repo
                    .messages(room_id)
                    .into_iter()
                    .filter(|message| message.status == MessageStatus::Failed)
                    .map(|message| message.id)
                    .collect();
                let mut resent = Vec::with_capacity(failed.len());
                for message_id in failed {
                    if let Some(event_id) = self.repo.retry_message(room_id, &message_id).await? {
                        resent.push(event_id);
                    }
                }
                Ok(format!("resent {}", resent.len()))
            }
        }
    }

    fn report(&self, fixture: &Fixture, steps: Vec<StepReport>) -> Report {
        let rooms = self.repo.rooms();
        let mut room_ids: Vec<&str> = fixture.rooms.iter().map(|room| room.room_id.as_str()).collect();
        room_ids.extend(rooms.iter().map(|room| room.id.as_str()));
        let messages = room_ids
            .into_iter()
            .map(|room_id| (room_id.to_owned(), self.repo.messages(room_id)))
            .filter(|(_, messages)| !messages.is_empty())
            .collect();
        let notifications = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Report {
            user_id: fixture.user_id.clone(),
            total_unread: self.repo.total_unread_count(),
            rooms,
            messages,
            notifications,
            steps,
        }
    }
}
