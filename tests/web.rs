use std::net::SocketAddr;

use serde_json::Value;
use url::Url;
use watchshare::web::{AppState, router};

/// Serves the router on an ephemeral port and returns its address.
async fn serve(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

async fn get_text(url: String) -> (reqwest::StatusCode, String) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status();
    (status, response.text().await.unwrap())
}

#[tokio::test]
async fn test_pages_are_served() {
    let addr = serve(AppState::new(None)).await;

    let (status, body) = get_text(format!("http://{addr}/")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert!(body.contains("/create-room"));
    assert!(body.contains("/join-room"));

    let (status, body) = get_text(format!("http://{addr}/create-room")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert!(body.contains("/api/share"));
}

#[tokio::test]
async fn test_join_page_prefills_room_from_query() {
    let addr = serve(AppState::new(None)).await;

    let (_, body) = get_text(format!("http://{addr}/join-room?room=abc123")).await;
    assert!(body.contains(r#"value="abc123""#));
    assert!(!body.contains("{{ room }}"));

    let (_, body) = get_text(format!("http://{addr}/join-room")).await;
    assert!(body.contains(r#"value="""#));
}

#[tokio::test]
async fn test_join_page_escapes_room_parameter() {
    let addr = serve(AppState::new(None)).await;

    let mut url = Url::parse(&format!("http://{addr}/join-room")).unwrap();
    url.query_pairs_mut()
        .append_pair("room", r#""><script>alert(1)</script>"#);
    let (_, body) = get_text(url.to_string()).await;

    assert!(!body.contains("<script>alert(1)</script>"));
    assert!(body.contains("&quot;&gt;&lt;script&gt;alert(1)&lt;/script&gt;"));
}

#[tokio::test]
async fn test_share_api_builds_link_from_host_header() {
    let addr = serve(AppState::new(None)).await;

    let view: Value = reqwest::get(format!("http://{addr}/api/share?room=abc123"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let expected = format!("http://{addr}/join-room?room=abc123");
    assert_eq!(view["room_label"], "abc123");
    assert_eq!(view["link"], expected.as_str());
    assert_eq!(view["link_label"], expected.as_str());
    assert_eq!(view["can_copy"], true);
}

#[tokio::test]
async fn test_share_api_prefers_public_url() {
    let origin = Url::parse("https://watch.example.com").unwrap();
    let addr = serve(AppState::new(Some(origin))).await;

    let view: Value = reqwest::get(format!("http://{addr}/api/share?room=xyz789"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        view["link"],
        "https://watch.example.com/join-room?room=xyz789"
    );
}

#[tokio::test]
async fn test_share_api_without_room_shows_placeholders() {
    let addr = serve(AppState::new(None)).await;

    let view: Value = reqwest::get(format!("http://{addr}/api/share"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["room_label"], "Creating room ID...");
    assert_eq!(view["link_label"], "Generating URL...");
    assert_eq!(view["link"], Value::Null);
    assert_eq!(view["can_copy"], false);
}
