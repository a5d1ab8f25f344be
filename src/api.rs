use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use axum::extract::{Path, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::bookings::{self, BookingEdit, NewBooking, Transition};
use crate::config::Config;
use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::events::{Fanout, RoomEvent};
use crate::model::{Booking, Message, Room};
use crate::policy::{self, PermittedActions};
use crate::reviews::{self, NewReview};
use crate::{auth, identities, messages, reads, rooms, ws};

const FANOUT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub fanout: Arc<Fanout>,
    pub token_secret: Arc<Vec<u8>>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> AnyResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let pool = db::open_pool(config.data_dir.join("care_chat.db"))?;
        let token_secret = Arc::new(config.resolve_token_secret()?);
        Ok(Self {
            pool,
            fanout: Arc::new(Fanout::new(FANOUT_CAPACITY)),
            token_secret,
            config,
        })
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

pub(crate) fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Chat gate shared by the room REST endpoints and the room socket: the
/// actor must be a room participant and the policy must currently grant
/// `chat` on the underlying booking.
pub(crate) fn authorize_chat(conn: &Connection, room: &Room, actor: Uuid) -> Result<()> {
    if !room.is_participant(actor) {
        return Err(Error::Forbidden);
    }
    let booking = bookings::get_booking(conn, room.booking_id)?;
    if !policy::permitted_actions(&booking, actor, today(), false).chat {
        return Err(Error::Forbidden);
    }
    Ok(())
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/identities", put(upsert_identity))
        .route("/api/bookings", post(create_booking).get(list_bookings))
        .route("/api/bookings/:id", get(get_booking).patch(edit_booking))
        .route("/api/bookings/:id/accept", post(accept_booking))
        .route("/api/bookings/:id/reject", post(reject_booking))
        .route("/api/bookings/:id/cancel", post(cancel_booking))
        .route("/api/bookings/:id/actions", get(booking_actions))
        .route("/api/bookings/:id/room", post(open_room))
        .route("/api/bookings/:id/review", post(create_review))
        .route("/api/rooms", get(list_rooms))
        .route(
            "/api/rooms/:id/messages",
            get(room_messages).post(send_message),
        )
        .route("/api/rooms/:id/read", post(mark_read))
        .route("/api/rooms/:id/ws", get(ws::room_ws))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> std::result::Result<Response, StatusCode> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                if let Ok(claims) = auth::verify_token(&state.token_secret, token) {
                    req.extensions_mut().insert(claims);
                    return Ok(next.run(req).await);
                }
            }
        }
    }
    Err(StatusCode::UNAUTHORIZED)
}

#[derive(Deserialize)]
struct IdentityReq {
    display_name: String,
}

async fn upsert_identity(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Json(req): Json<IdentityReq>,
) -> Result<impl IntoResponse> {
    let conn = state.conn()?;
    let identity = identities::upsert_identity(&conn, claims.sub, &req.display_name)?;
    Ok(Json(identity))
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Json(req): Json<NewBooking>,
) -> Result<impl IntoResponse> {
    let conn = state.conn()?;
    let booking = bookings::create_booking(&conn, claims.sub, req)?;
    tracing::info!(booking = %booking.id, requester = %claims.sub, "booking created");
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
) -> Result<Json<Vec<Booking>>> {
    let conn = state.conn()?;
    Ok(Json(bookings::list_bookings_for_actor(&conn, claims.sub)?))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    let conn = state.conn()?;
    let booking = bookings::get_booking(&conn, id)?;
    if !booking.is_party(claims.sub) {
        return Err(Error::Forbidden);
    }
    Ok(Json(booking))
}

async fn edit_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
    Json(edit): Json<BookingEdit>,
) -> Result<Json<Booking>> {
    let conn = state.conn()?;
    Ok(Json(bookings::edit_booking(&conn, id, claims.sub, edit)?))
}

async fn accept_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    transition(&state, id, claims.sub, Transition::Accept)
}

async fn reject_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    transition(&state, id, claims.sub, Transition::Reject)
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    transition(&state, id, claims.sub, Transition::Cancel)
}

fn transition(state: &AppState, id: Uuid, actor: Uuid, t: Transition) -> Result<Json<Booking>> {
    let conn = state.conn()?;
    let booking = bookings::apply_transition(&conn, id, actor, t)?;
    tracing::info!(booking = %booking.id, status = %booking.status, "booking transition");
    Ok(Json(booking))
}

async fn booking_actions(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<PermittedActions>> {
    let conn = state.conn()?;
    let booking = bookings::get_booking(&conn, id)?;
    let has_review = reviews::has_review(&conn, booking.id, claims.sub)?;
    Ok(Json(policy::permitted_actions(
        &booking,
        claims.sub,
        today(),
        has_review,
    )))
}

/// Open (find or lazily create) the booking's room. Fails with `Forbidden`
/// unless the policy currently grants `chat`.
async fn open_room(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Room>> {
    let conn = state.conn()?;
    let booking = bookings::get_booking(&conn, id)?;
    if !policy::permitted_actions(&booking, claims.sub, today(), false).chat {
        return Err(Error::Forbidden);
    }
    let room = rooms::get_or_create_room(
        &conn,
        booking.requester_id,
        booking.provider_id,
        booking.id,
    )?;
    Ok(Json(room))
}

async fn create_review(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewReview>,
) -> Result<impl IntoResponse> {
    let conn = state.conn()?;
    let booking = bookings::get_booking(&conn, id)?;
    let review = reviews::create_review(&conn, &booking, claims.sub, today(), req)?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
) -> Result<Json<Vec<rooms::RoomSummary>>> {
    let conn = state.conn()?;
    Ok(Json(rooms::list_rooms_for_actor(&conn, claims.sub)?))
}

#[derive(Deserialize)]
struct MessagesQuery {
    after: Option<i64>,
    limit: Option<usize>,
}

async fn room_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
    Query(q): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>> {
    let conn = state.conn()?;
    let room = rooms::get_room(&conn, id)?;
    authorize_chat(&conn, &room, claims.sub)?;
    Ok(Json(messages::list_messages(
        &conn,
        room.id,
        q.after,
        q.limit.unwrap_or(50),
    )?))
}

#[derive(Deserialize)]
struct SendMessageReq {
    body: String,
}

async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageReq>,
) -> Result<impl IntoResponse> {
    let conn = state.conn()?;
    let room = rooms::get_room(&conn, id)?;
    authorize_chat(&conn, &room, claims.sub)?;
    let message = state.fanout.publish_with(room.id, || {
        let message = messages::post_message(&conn, &room, claims.sub, &req.body)?;
        let event = RoomEvent::from(&message);
        Ok((message, Some(event)))
    })?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Deserialize)]
struct MarkReadReq {
    message_id: i64,
}

#[derive(Serialize)]
struct ReceiptResp {
    room_id: Uuid,
    participant_id: Uuid,
    last_read_message_id: Option<i64>,
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkReadReq>,
) -> Result<Json<ReceiptResp>> {
    let conn = state.conn()?;
    let room = rooms::get_room(&conn, id)?;
    authorize_chat(&conn, &room, claims.sub)?;
    state.fanout.publish_with(room.id, || {
        let advanced = reads::mark_read(&conn, &room, claims.sub, req.message_id)?;
        let event = advanced.map(|cursor| RoomEvent::Receipt {
            room_id: room.id,
            participant_id: claims.sub,
            last_read_message_id: cursor,
        });
        Ok(((), event))
    })?;
    let last_read_message_id = reads::get_receipt(&conn, room.id, claims.sub)?;
    Ok(Json(ReceiptResp {
        room_id: room.id,
        participant_id: claims.sub,
        last_read_message_id,
    }))
}

/// Run the HTTP server bound to the configured address.
pub async fn run_http_server(config: Config) -> AnyResult<()> {
    let state = AppState::new(config)?;
    let addr: SocketAddr = state.config.bind.parse()?;
    tracing::info!(%addr, "care_chat listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}

// Integration tests live in the tests/ directory.
