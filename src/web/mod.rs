//! # WatchShare Web Module
//!
//! Serves the browser front-end: the landing page, the host page and the join
//! page, plus a small JSON endpoint describing the share widget for a room.
//!
//! ## Routes
//!
//! - `GET /` - landing page
//! - `GET /create-room` - host page
//! - `GET /join-room?room={id}` - join page, input pre-filled with `{id}`
//! - `GET /api/share?room={id}` - [`ShareView`] for `{id}`
//!
//! Deep links are built from `--public-url` when given, otherwise from the
//! `Host` header of the request.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::share::{ShareSurface, ShareView};

// Embed HTML templates at compile time
const INDEX_HTML: &str = include_str!("../../public/index.html");
const CREATE_ROOM_HTML: &str = include_str!("../../public/create-room.html");
const JOIN_ROOM_HTML: &str = include_str!("../../public/join-room.html");

#[derive(Clone)]
pub struct AppState {
    public_origin: Option<Url>,
}

impl AppState {
    pub fn new(public_origin: Option<Url>) -> Self {
        Self { public_origin }
    }
}

#[derive(Deserialize)]
struct RoomQuery {
    room: Option<String>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "WatchShare web server - serves the screen sharing pages"
)]
pub struct Args {
    /// Host to bind the web server to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the web server
    #[arg(long, default_value_t = 8386)]
    pub port: u16,

    /// Public origin used in shareable links, e.g. https://watch.example.com
    ///
    /// Defaults to the Host header of each request.
    #[arg(long)]
    pub public_url: Option<String>,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home_page))
        .route("/create-room", get(create_room_page))
        .route("/join-room", get(join_room_page))
        .route("/api/share", get(share_view))
        .with_state(state)
}

pub async fn run_web_server(args: Args) -> Result<()> {
    let public_origin = args
        .public_url
        .as_deref()
        .map(Url::parse)
        .transpose()
        .context("invalid --public-url")?;

    if let Some(origin) = &public_origin {
        info!("Shareable links will use origin {}", origin);
    }

    let app = router(AppState::new(public_origin));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Web server starting on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn home_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn create_room_page() -> Html<&'static str> {
    Html(CREATE_ROOM_HTML)
}

async fn join_room_page(Query(query): Query<RoomQuery>) -> Html<String> {
    let room = query.room.unwrap_or_default();
    Html(JOIN_ROOM_HTML.replace("{{ room }}", &escape_html(room.trim())))
}

async fn share_view(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
) -> Result<Json<ShareView>, StatusCode> {
    let origin = request_origin(&state, &headers)?;
    let room = query.room.unwrap_or_default();
    Ok(Json(ShareSurface::new(&origin, room.trim()).view()))
}

fn request_origin(state: &AppState, headers: &HeaderMap) -> Result<Url, StatusCode> {
    if let Some(origin) = &state.public_origin {
        return Ok(origin.clone());
    }

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            warn!("Request without Host header and no public URL configured");
            StatusCode::BAD_REQUEST
        })?;

    Url::parse(&format!("http://{host}")).map_err(|e| {
        warn!("Unusable Host header '{}': {}", host, e);
        StatusCode::BAD_REQUEST
    })
}

/// Escapes text for use inside HTML element content and quoted attributes.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_neutralises_markup() {
        assert_eq!(
            escape_html(r#""><script>alert('x')</script>"#),
            "&quot;&gt;&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"
        );
        assert_eq!(escape_html("abc123"), "abc123");
    }

    #[test]
    fn configured_origin_wins_over_host_header() {
        let state = AppState::new(Some(Url::parse("https://watch.example.com").unwrap()));
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "internal:8386".parse().unwrap());

        let origin = request_origin(&state, &headers).unwrap();
        assert_eq!(origin.as_str(), "https://watch.example.com/");
    }

    #[test]
    fn missing_host_without_public_url_is_rejected() {
        let state = AppState::new(None);
        assert_eq!(
            request_origin(&state, &HeaderMap::new()),
            Err(StatusCode::BAD_REQUEST)
        );
    }

    #[test]
    fn templates_carry_their_placeholders() {
        assert!(JOIN_ROOM_HTML.contains("{{ room }}"));
        assert!(CREATE_ROOM_HTML.contains("/api/share"));
        assert!(INDEX_HTML.contains("/create-room"));
        assert!(INDEX_HTML.contains("/join-room"));
    }
}
