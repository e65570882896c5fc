use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use futures::Stream;
use itin_core::{connected_event, StorageError};
use itin_types::CreateItineraryRequest;
use itin_wire::{CreateItineraryResponse, ErrorResponse, EventFilterQuery, ItineraryDto};
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use crate::{now_ms, AppState};

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/itineraries", post(create_itinerary))
        .route("/itineraries/{id}", get(get_itinerary))
        .route("/events", get(events))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// `POST /itineraries` (spec §6): synchronously creates the itinerary
/// skeleton and returns before generation completes, then kicks off the
/// pipeline in the background. The handler awaits a generation permit
/// before spawning so `max_concurrent_generations` is honored even under
/// burst load — callers simply see the request queue briefly rather than
/// being rejected.
async fn create_itinerary(
    State(state): State<AppState>,
    Json(req): Json<CreateItineraryRequest>,
) -> Result<Json<CreateItineraryResponse>, (StatusCode, Json<ErrorResponse>)> {
    req.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("invalid_input", e.to_string())),
        )
    })?;

    let itinerary = itin_orchestrator::InitializationService::initialize(&state.storage, &req)
        .await
        .map_err(storage_error_response)?;

    let itinerary_id = itinerary.itinerary_id.clone();
    let version = itinerary.version;
    let dto = ItineraryDto::from(itinerary);

    let state_for_run = state.clone();
    let itinerary_id_for_run = itinerary_id.clone();
    tokio::spawn(async move {
        let Ok(permit) = state_for_run.generation_semaphore.clone().acquire_owned().await else {
            return;
        };
        if let Err(error) = state_for_run
            .orchestrator
            .generate(itinerary_id_for_run.clone(), &state_for_run.agents)
            .await
        {
            tracing::warn!(itinerary_id = %itinerary_id_for_run, error = %error, "generation ended with an error");
        }
        drop(permit);
    });

    Ok(Json(CreateItineraryResponse {
        itinerary_id: itinerary_id.clone(),
        version,
        status: "initialized".to_string(),
        estimated_completion_sec: 60,
        events_url: format!("/events?itinerary_id={itinerary_id}"),
        initial_structure: dto,
    }))
}

/// `GET /itineraries/{id}` (spec §6): current coherent snapshot, whatever
/// phase generation has reached.
async fn get_itinerary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ItineraryDto>, (StatusCode, Json<ErrorResponse>)> {
    let itinerary = state.storage.get(&id).await.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", format!("itinerary {id} not found"))),
        )
    })?;
    Ok(Json(ItineraryDto::from(itinerary)))
}

/// `GET /events?itinerary_id=&last_event_id=` (spec §4.1/§6): SSE stream.
/// Registers with the Connection Manager, then delivers `(connected,
/// replayedEvents..., liveEvents...)` in that exact order (spec §6 line
/// 173) — `connected` is synthesized locally rather than pushed through
/// the subscriber channel, so it can never be reordered behind a
/// broadcast that lands between registration and the first poll.
async fn events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilterQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (registration, replay, last_event_id) = state
        .connection_manager
        .register(&filter.itinerary_id, filter.last_event_id)
        .await;

    let receiver = registration
        .take_receiver()
        .await
        .expect("receiver taken exactly once, right after registration");

    let guard = RegistrationGuard {
        state: state.clone(),
        itinerary_id: filter.itinerary_id.clone(),
        subscription_id: registration.subscription_id.clone(),
    };

    let connected = connected_event(&filter.itinerary_id, last_event_id);
    let connected_stream = stream::once(async move {
        let payload = serde_json::to_string(&connected).expect("EventEnvelope always serializes");
        Ok(Event::default().data(payload))
    });

    let replay_stream = stream::iter(
        replay
            .into_iter()
            .filter_map(|envelope| serde_json::to_string(&envelope).ok())
            .map(|payload| Ok(Event::default().data(payload))),
    );

    let live_stream = ReceiverStream::new(receiver)
        .filter_map(|envelope| async move { serde_json::to_string(&envelope).ok() })
        .map(|payload| Ok(Event::default().data(payload)))
        .map(move |item| {
            let _ = &guard;
            item
        });

    Sse::new(connected_stream.chain(replay_stream).chain(live_stream))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
}

/// Keeps a subscription registered for as long as the SSE stream is
/// alive; dropped when the client disconnects and the stream is torn
/// down, which spawns the unregister so a slow/cancelled drop never
/// blocks axum's stream machinery.
struct RegistrationGuard {
    state: AppState,
    itinerary_id: String,
    subscription_id: String,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let itinerary_id = std::mem::take(&mut self.itinerary_id);
        let subscription_id = std::mem::take(&mut self.subscription_id);
        tokio::spawn(async move {
            state.connection_manager.unregister(&itinerary_id, &subscription_id).await;
        });
    }
}

/// `GET /health` readiness probe.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_ms": now_ms().saturating_sub(state.started_at_ms),
    }))
}

fn storage_error_response(error: StorageError) -> (StatusCode, Json<ErrorResponse>) {
    match error {
        StorageError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", format!("itinerary {id} not found"))),
        ),
        StorageError::Conflict { expected, actual } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(
                "conflict",
                format!("expected version {expected}, found {actual}"),
            )),
        ),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("internal", other.to_string())),
        ),
    }
}
