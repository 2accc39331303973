use crate::{auth, handlers, middleware as mw, AppState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    // Edge functions; every one needs a verified caller
    let api = Router::new()
        .route("/me", get(handlers::get_me))
        .route("/coach/chat", post(handlers::coach_chat))
        .route("/tank/score", post(handlers::score_pitch))
        .route(
            "/missions/{mission_id}/progress",
            post(handlers::update_progress),
        )
        .route("/checkout/quote", post(handlers::checkout_quote))
        .route("/admin/students/{user_id}/xp", post(handlers::grant_xp))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let cors = mw::cors_layer(&state.settings.cors);

    Router::new()
        // Public
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::ip_guard_middleware,
        ))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(middleware::from_fn(mw::security_headers_middleware))
                .layer(TraceLayer::new_for_http()),
        )
}
