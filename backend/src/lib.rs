use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use santa_core::{
    commit_draw, draw_notice, prepare_draw, DrawError, Group, GroupDetails, GroupEvent,
    GroupStore, JoinError, JoinRequest, MemoryStore, Notice, NoticeLevel, Notifier, Participant,
    StoreError,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod config;
pub mod error;

use config::{Config, DEFAULT_CHANNEL_CAPACITY};
use error::ApiError;

// set by the upstream auth layer
pub const OWNER_HEADER: &str = "x-owner-id";

const CREATE_GROUP_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct AppState {
    store: Arc<RwLock<MemoryStore>>,
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<ServerMessage>>>>,
    persist_path: Option<PathBuf>,
    // held from snapshot to rename so writes land in commit order
    persist_lock: Arc<Mutex<()>>,
    channel_capacity: usize,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            store: Arc::new(RwLock::new(MemoryStore::new())),
            channels: Arc::new(RwLock::new(HashMap::new())),
            persist_path: None,
            persist_lock: Arc::new(Mutex::new(())),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl AppState {
    pub async fn from_config(config: &Config) -> Self {
        let mut state = Self {
            channel_capacity: config.channel_capacity,
            ..Self::default()
        };
        if let Some(path) = &config.persist_path {
            state.load(path.clone()).await;
        }
        state
    }

    pub async fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let config = Config {
            persist_path: Some(path.into()),
            ..Config::default()
        };
        Self::from_config(&config).await
    }

    async fn load(&mut self, path: PathBuf) {
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<MemoryStore>(&bytes) {
                Ok(saved) => {
                    info!(path = %path.display(), groups = saved.group_count(), "loaded groups");
                    *self.store.write().await = saved;
                }
                Err(err) => warn!(path = %path.display(), %err, "ignoring unreadable snapshot"),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no snapshot yet");
            }
            Err(err) => warn!(path = %path.display(), %err, "could not read snapshot"),
        }
        self.persist_path = Some(path);
    }

    async fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = {
            let store = self.store.read().await;
            store.clone()
        };
        let json = match serde_json::to_vec_pretty(&snapshot) {
            Ok(json) => json,
            Err(err) => {
                error!(%err, "failed to encode snapshot");
                return;
            }
        };
        let tmp = temp_path(path);
        if let Err(err) = tokio::fs::write(&tmp, json).await {
            error!(path = %tmp.display(), %err, "persist error");
            return;
        }
        if let Err(err) = tokio::fs::rename(&tmp, path).await {
            error!(path = %path.display(), %err, "persist error");
        }
    }

    async fn sender(&self, group_id: &str) -> broadcast::Sender<ServerMessage> {
        let mut channels = self.channels.write().await;
        channels
            .entry(group_id.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone()
    }

    async fn publish(&self, group_id: &str, messages: Vec<ServerMessage>) {
        if let Some(tx) = self.channels.read().await.get(group_id) {
            for message in messages {
                // No subscribers is fine.
                let _ = tx.send(message);
            }
        }
    }

    async fn notifier(&self, group_id: &str) -> ChannelNotifier {
        ChannelNotifier {
            sender: self.channels.read().await.get(group_id).cloned(),
        }
    }
}

struct ChannelNotifier {
    sender: Option<broadcast::Sender<ServerMessage>>,
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Success => {
                info!(group_id = %notice.group_id, message = %notice.message, "notice")
            }
            NoticeLevel::Failure => {
                warn!(group_id = %notice.group_id, message = %notice.message, "notice")
            }
        }
        if let Some(tx) = &self.sender {
            let _ = tx.send(ServerMessage::Notice(notice));
        }
    }
}

// no emails, ids or pairings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub exchange_date: Option<String>,
    pub price_limit_cents: Option<u64>,
    pub participants: Vec<MemberView>,
    pub drawn: bool,
    pub draw_date: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberView {
    pub name: String,
    pub joined_at: u64,
}

impl From<&Group> for GroupView {
    fn from(group: &Group) -> Self {
        Self {
            id: group.id.clone(),
            name: group.details.name.clone(),
            description: group.details.description.clone(),
            exchange_date: group.details.exchange_date.clone(),
            price_limit_cents: group.details.price_limit_cents,
            participants: group
                .participants
                .iter()
                .map(|p| MemberView {
                    name: p.name.clone(),
                    joined_at: p.joined_at,
                })
                .collect(),
            drawn: group.is_drawn(),
            draw_date: group.draw_date,
        }
    }
}

// pairings stay hidden even from the owner
#[derive(Clone, Debug, Serialize)]
struct OwnerGroupView {
    id: String,
    #[serde(flatten)]
    details: GroupDetails,
    invite_code: String,
    invite_password: String,
    participants: Vec<Participant>,
    drawn: bool,
    draw_date: Option<u64>,
    created_at: u64,
}

impl From<Group> for OwnerGroupView {
    fn from(group: Group) -> Self {
        let drawn = group.is_drawn();
        Self {
            id: group.id,
            details: group.details,
            invite_code: group.invite_code,
            invite_password: group.invite_password,
            participants: group.participants,
            drawn,
            draw_date: group.draw_date,
            created_at: group.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    State(GroupView),
    Event(GroupEvent),
    Notice(Notice),
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/groups", post(create_group).get(list_groups))
        .route("/groups/:id", get(get_group))
        .route("/groups/:id/draw", post(draw_group))
        .route(
            "/groups/:id/assignment/:participant_id",
            get(get_assignment),
        )
        .route("/join/:code", get(get_invite).post(join_group))
        .route("/ws/groups/:id", get(ws_handler))
        .with_state(state)
}

fn temp_path(path: &std::path::Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn owner_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("owner id required".into()))
}

fn owned_by(group: &Group, owner_id: &str) -> Result<(), ApiError> {
    group
        .ensure_owner(owner_id)
        .map_err(|_| ApiError::Forbidden("not the group owner".into()))
}

#[derive(Serialize)]
struct CreateGroupResponse {
    group_id: String,
    invite_code: String,
    invite_password: String,
}

async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(details): Json<GroupDetails>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = owner_id(&headers)?;
    let mut rng = ChaCha8Rng::from_entropy();

    let response = {
        let mut store = state.store.write().await;
        let mut attempt = 1;
        loop {
            let group = Group::new(
                Uuid::new_v4().to_string(),
                owner_id.clone(),
                details.clone(),
                &mut rng,
                now_millis(),
            )?;
            let response = CreateGroupResponse {
                group_id: group.id.clone(),
                invite_code: group.invite_code.clone(),
                invite_password: group.invite_password.clone(),
            };
            match store.insert_group(group) {
                Ok(()) => break response,
                Err(StoreError::DuplicateInviteCode(_)) if attempt < CREATE_GROUP_ATTEMPTS => {
                    debug!(attempt, "invite code collision, regenerating");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    };

    info!(group_id = %response.group_id, %owner_id, "group created");
    state.persist().await;

    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = owner_id(&headers)?;
    let groups = state.store.read().await.groups_for_owner(&owner_id);
    let views: Vec<OwnerGroupView> = groups.into_iter().map(OwnerGroupView::from).collect();
    Ok(Json(views))
}

async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = owner_id(&headers)?;
    let group = state
        .store
        .read()
        .await
        .group(&group_id)
        .ok_or_else(|| ApiError::NotFound("group not found".into()))?;
    owned_by(&group, &owner_id)?;
    Ok(Json(OwnerGroupView::from(group)))
}

async fn get_invite(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state
        .store
        .read()
        .await
        .find_by_invite_code(&code)
        .ok_or(JoinError::GroupNotFound)?;
    Ok(Json(GroupView::from(&group)))
}

#[derive(Serialize)]
struct JoinResponse {
    group_id: String,
    participant_id: String,
}

async fn join_group(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<JoinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let participant_id = Uuid::new_v4().to_string();

    let (group, event) = {
        let mut store = state.store.write().await;
        let mut group = store
            .find_by_invite_code(&code)
            .ok_or(JoinError::GroupNotFound)?;
        let event = group.join(request, participant_id.clone(), now_millis())?;
        store.save_participants(&group.id, group.participants.clone())?;
        (group, event)
    };

    info!(group_id = %group.id, %participant_id, "participant joined");
    state
        .publish(
            &group.id,
            vec![
                ServerMessage::Event(event),
                ServerMessage::State(GroupView::from(&group)),
            ],
        )
        .await;
    state.persist().await;

    Ok(Json(JoinResponse {
        group_id: group.id,
        participant_id,
    }))
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct DrawResponse {
    group_id: String,
    draw_date: Option<u64>,
    participant_count: usize,
    message: String,
}

async fn draw_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DrawParams>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = owner_id(&headers)?;
    let snapshot = state
        .store
        .read()
        .await
        .group(&group_id)
        .ok_or(DrawError::GroupNotFound)?;
    owned_by(&snapshot, &owner_id)?;

    let mut rng = params
        .seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);
    let now = now_millis();

    // Computed without holding the lock; the commit re-checks the stored
    // group so a racing session cannot overwrite an earlier draw.
    let outcome = match prepare_draw(&snapshot, &owner_id, &mut rng, now) {
        Ok(record) => commit_draw(&mut *state.store.write().await, &group_id, record),
        Err(err) => Err(err),
    };

    let notice = draw_notice(&group_id, &outcome);
    let message = notice.message.clone();
    state.notifier(&group_id).await.notify(notice);
    let group = outcome?;

    state
        .publish(
            &group_id,
            vec![
                ServerMessage::Event(GroupEvent::DrawCompleted {
                    drawn_at: now,
                    participant_count: group.participants.len(),
                }),
                ServerMessage::State(GroupView::from(&group)),
            ],
        )
        .await;
    state.persist().await;

    Ok(Json(DrawResponse {
        group_id,
        draw_date: group.draw_date,
        participant_count: group.participants.len(),
        message,
    }))
}

#[derive(Serialize)]
struct AssignmentResponse {
    group_id: String,
    giver: String,
    receiver: ReceiverView,
}

#[derive(Serialize)]
struct ReceiverView {
    name: String,
    gift_hints: Option<String>,
}

async fn get_assignment(
    State(state): State<AppState>,
    Path((group_id, participant_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state
        .store
        .read()
        .await
        .group(&group_id)
        .ok_or_else(|| ApiError::NotFound("group not found".into()))?;
    let giver = group
        .participant(&participant_id)
        .ok_or_else(|| ApiError::NotFound("participant not found".into()))?;
    if !group.is_drawn() {
        return Err(ApiError::Conflict(
            "the draw has not been performed yet".into(),
        ));
    }
    let receiver = group
        .assignment_for(&participant_id)
        .ok_or_else(|| ApiError::Internal("draw has no assignment for participant".into()))?;

    Ok(Json(AssignmentResponse {
        group_id: group.id.clone(),
        giver: giver.name.clone(),
        receiver: ReceiverView {
            name: receiver.name.clone(),
            gift_hints: receiver.gift_hints.clone(),
        },
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, group_id))
}

async fn handle_socket(stream: WebSocket, state: AppState, group_id: String) {
    let (mut sender, mut receiver) = stream.split();

    let snapshot = state
        .store
        .read()
        .await
        .group(&group_id)
        .map(|g| GroupView::from(&g));
    let Some(snapshot) = snapshot else {
        let _ = sender.send(Message::Text("unknown group".into())).await;
        return;
    };

    let mut rx = state.sender(&group_id).await.subscribe();
    if send_message(&mut sender, &ServerMessage::State(snapshot))
        .await
        .is_err()
    {
        return;
    }
    debug!(%group_id, "observer connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if send_message(&mut sender, &message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer lagging, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Observers are read-only; drain until the client goes away.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    debug!(%group_id, "observer disconnected");
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(err) => {
            error!(%err, "failed to encode server message");
            Ok(())
        }
    }
}
