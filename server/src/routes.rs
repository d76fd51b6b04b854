use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::JwtSecret;
use crate::chat::{chats, groups, messages};
use crate::state::AppState;
use crate::users;
use crate::ws::handler as ws_handler;

/// Multipart overhead allowed on top of the file size limit.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);
    if origin.is_empty() {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            tracing::warn!(origin = %origin, "Invalid client origin, allowing any");
            layer.allow_origin(Any)
        }
    }
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let chat_routes = Router::new()
        .route(
            "/api/chat",
            axum::routing::get(chats::fetch_chats).post(chats::create_or_retrieve_chat),
        )
        .route("/api/chat/group/name", axum::routing::put(groups::rename_group))
        .route(
            "/api/chat/group/picture/remove",
            axum::routing::put(groups::remove_group_picture),
        )
        .route("/api/chat/group/add", axum::routing::put(groups::add_users))
        .route("/api/chat/group/remove", axum::routing::put(groups::remove_user))
        .route("/api/chat/group/admin", axum::routing::put(groups::make_admin))
        .route(
            "/api/chat/group/admin/dismiss",
            axum::routing::put(groups::dismiss_admin),
        )
        .route("/api/chat/group/delete", axum::routing::put(groups::delete_group));

    let message_routes = Router::new()
        .route("/api/message/{chat_id}", axum::routing::get(messages::fetch_messages))
        .route("/api/message/delete", axum::routing::put(messages::delete_messages))
        .route(
            "/api/message/files/{key}",
            axum::routing::get(messages::access_attachment),
        );

    // Multipart endpoints carry files up to the configured upload limit.
    let upload_routes = Router::new()
        .route("/api/chat/group", axum::routing::post(groups::create_group))
        .route(
            "/api/chat/group/picture",
            axum::routing::put(groups::update_group_picture),
        )
        .route("/api/message", axum::routing::post(messages::send_message))
        .route("/api/message/update", axum::routing::put(messages::update_message))
        .route(
            "/api/user/update/profile-pic",
            axum::routing::put(users::update_profile_picture),
        )
        .layer(DefaultBodyLimit::max(
            state.uploads.max_bytes + FORM_OVERHEAD_BYTES,
        ));

    let user_routes = Router::new()
        .route("/api/user", axum::routing::get(users::search_users))
        .route("/api/user/update/name", axum::routing::put(users::update_user_name))
        .route(
            "/api/user/delete/profile-pic",
            axum::routing::put(users::remove_profile_picture),
        )
        .route(
            "/api/user/notifications",
            axum::routing::get(users::fetch_notifications),
        )
        .route(
            "/api/user/notifications/dismiss",
            axum::routing::put(users::dismiss_notifications),
        );

    // WebSocket upgrade authenticated by ?token=; init-session binds the token's user
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    let mut router = Router::new()
        .merge(chat_routes)
        .merge(message_routes)
        .merge(upload_routes)
        .merge(user_routes)
        .merge(ws_routes)
        .merge(health);

    for mount in &state.media {
        if mount.public_url.starts_with('/') && mount.public_url.len() > 1 {
            router = router.nest_service(&mount.public_url, ServeDir::new(&mount.dir));
        }
    }

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .layer(cors_layer(&state.client_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
