pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Hookline Studio API",
        version = "0.1.0",
        description = "API for Hookline Studio - multi-phase marketing content generation"
    ),
    paths(
        routes::health_check,
        routes::list_campaigns,
        routes::create_campaign,
        routes::get_campaign,
        routes::run_phase,
        routes::pause_campaign,
        routes::resume_campaign,
        routes::retry_campaign,
        routes::finalize_campaign,
        routes::check_and_process_batch,
        routes::submit_batch,
        routes::retry_batch,
        routes::list_batches,
        routes::sse::events_stream,
        routes::sse::campaign_events_stream,
    ),
    components(schemas(
        routes::HealthResponse,
        error::ErrorResponse,
        hookline_core::Campaign,
        hookline_core::CampaignStatus,
        hookline_core::CreateCampaignRequest,
        hookline_core::Phase,
        hookline_core::MarketingAngle,
        hookline_core::AngleType,
        hookline_core::Hook,
        hookline_core::Script,
        hookline_core::BatchJob,
        hookline_core::BatchKind,
        hookline_core::BatchStatus,
        orchestrator::ReconcileOutcome,
        orchestrator::ReconcileAction,
        orchestrator::BatchPoll,
        orchestrator::HarvestReport,
        orchestrator::SkippedItem,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "campaigns", description = "Campaign lifecycle and single-shot phases"),
        (name = "batches", description = "Hook and script batch submission and reconciliation"),
        (name = "events", description = "Real-time event streaming (SSE)"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health_check))
        .route(
            "/api/campaigns",
            get(routes::list_campaigns).post(routes::create_campaign),
        )
        .route("/api/campaigns/{id}", get(routes::get_campaign))
        .route(
            "/api/campaigns/{id}/phases/{phase}",
            post(routes::run_phase),
        )
        .route("/api/campaigns/{id}/pause", post(routes::pause_campaign))
        .route("/api/campaigns/{id}/resume", post(routes::resume_campaign))
        .route("/api/campaigns/{id}/retry", post(routes::retry_campaign))
        .route(
            "/api/campaigns/{id}/finalize",
            post(routes::finalize_campaign),
        )
        .route("/api/campaigns/{id}/batches", get(routes::list_batches))
        .route(
            "/api/campaigns/{id}/batches/{kind}",
            post(routes::submit_batch),
        )
        .route(
            "/api/campaigns/{id}/batches/{kind}/retry",
            post(routes::retry_batch),
        )
        .route(
            "/api/check-and-process-batch/{id}",
            post(routes::check_and_process_batch),
        )
        .route("/api/events", get(routes::sse::events_stream))
        .route(
            "/api/campaigns/{id}/events",
            get(routes::sse::campaign_events_stream),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
