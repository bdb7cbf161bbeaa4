//! Placeholder pages behind the authorization gate.

use crate::api::AppState;
use crate::session::Session;
use axum::{
    Extension,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use quick_xml::escape::escape;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct LoginEntryQuery {
    #[serde(default)]
    pub error: Option<String>,
}

/// GET / (login entry)
pub async fn login_entry(
    State(state): State<AppState>,
    Query(query): Query<LoginEntryQuery>,
) -> Html<String> {
    let error = query
        .error
        .map(|code| format!(r#"<p class="error">Sign-in failed: {}</p>"#, escape(&code)))
        .unwrap_or_default();

    let mut links = Vec::new();
    if state.saml.is_some() {
        links.push(r#"<li><a href="/api/saml/login">Sign in with SAML</a></li>"#);
    }
    if state.oidc.is_some() {
        links.push(r#"<li><a href="/api/auth/login">Sign in with OpenID Connect</a></li>"#);
    }

    Html(page(
        "Helpdesk sign-in",
        &format!(
            r#"{error}<ul>{}</ul>
<p>Administrators sign in with their local account.</p>"#,
            links.concat()
        ),
    ))
}

/// GET /MD/home
pub async fn admin_home(Extension(session): Extension<Session>) -> Html<String> {
    landing("Administration", &session)
}

/// GET /staff/home
pub async fn staff_home(Extension(session): Extension<Session>) -> Html<String> {
    landing("Staff", &session)
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html(page("Not found", ""))).into_response()
}

fn landing(title: &str, session: &Session) -> Html<String> {
    Html(page(
        title,
        &format!(
            r#"<p>Signed in as {} ({})</p><form method="post" action="/api/logout"><button>Sign out</button></form>"#,
            escape(&session.identity.display_name),
            session.identity.role
        ),
    ))
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body><h1>{title}</h1>\n{body}\n</body></html>\n"
    )
}
