//! REST API Server Implementation
//!
//! Main server that hosts all endpoints

use crate::api::{AppState, auth, middleware, oidc, pages, saml, users};
use crate::config::ServerConfig;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_body_size;

    let api = Router::new()
        .route("/api/login", post(auth::login))
        .route("/api/session", get(auth::session))
        .route("/api/logout", get(auth::logout_redirect).post(auth::logout))
        .route("/api/saml/login", get(saml::login))
        .route("/api/saml/callback", post(saml::callback))
        .route("/api/saml/metadata", get(saml::metadata))
        .route("/api/check-certificate", get(saml::check_certificate))
        .route("/api/auth/login", get(oidc::login))
        .route(
            "/api/auth/callback",
            get(oidc::callback_query).post(oidc::callback_form),
        )
        .route("/api/users", get(users::list_users))
        .route("/api/users/{id}", get(users::get_user));

    let pages = Router::new()
        .route("/", get(pages::login_entry))
        .route("/MD/home", get(pages::admin_home))
        .route("/staff/home", get(pages::staff_home))
        .fallback(pages::not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::gate_middleware,
        ));

    let middleware_stack = ServiceBuilder::new()
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(
            middleware::security_headers_middleware,
        ));

    api.merge(pages)
        .with_state(state)
        .layer(middleware_stack)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_body_size))
}

/// HTTP server
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self {
            config: state.config.server.clone(),
            state,
        }
    }

    pub fn build_router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Start the server
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(self.address()).await?;
        let addr = listener.local_addr()?;

        info!(
            %addr,
            public_base_url = %self.config.public_base_url,
            saml = self.state.saml.is_some(),
            oidc = self.state.oidc.is_some(),
            admins = self.state.config.admins.len(),
            "helpdesk-auth listening"
        );

        axum::serve(listener, app).await?;

        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}
