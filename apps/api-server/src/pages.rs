//! Security demo pages: one open, two behind role checks.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{Html, IntoResponse, Response},
};
use tracing::info;

use crate::AppState;

pub async fn unsecured() -> Html<&'static str> {
    Html("<h1>Unsecured Servlet</h1>\n")
}

/// Requires role `foo`; shows what the verified token says about the caller.
pub async fn protected(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match state.auth.authorize(&headers, &["foo"]).await {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let expires = caller
        .expires_at
        .map(|e| e.to_string())
        .unwrap_or_else(|| "-".into());
    let body = format!(
        "<h1>Secured Servlet</h1>\n\
         <p>token type:Bearer</p>\n\
         <p>subject:{}</p>\n\
         <p>expires at:{}</p>\n\
         <p>claims json:{}</p>\n",
        escape_html(&caller.subject),
        expires,
        escape_html(&caller.claims.to_string()),
    );
    Html(body).into_response()
}

/// Requires role `foo` or `bar`; answers with the caller name.
pub async fn username(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state.auth.authorize(&headers, &["foo", "bar"]).await {
        Ok(caller) => {
            info!(principal = %caller.principal.name, "username lookup");
            caller.principal.name.into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
