//! Conversation-admin surface of the upstream session, against a
//! wiremock upstream.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::session;

#[tokio::test]
async fn models_caches_slugs_and_captures_puid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "models": [{"slug": "text-davinci-002-render-sha"}, {"slug": "gpt-4"}]
                }))
                .insert_header("set-cookie", "_puid=puid-abc; Path=/"),
        )
        .mount(&server)
        .await;
    // The captured cookie must ride along as a header afterwards.
    Mock::given(method("GET"))
        .and(path("/conversation/conv-1"))
        .and(header("PUID", "puid-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "t"})))
        .expect(1)
        .mount(&server)
        .await;

    let session = session("a@x", &server.uri());
    let slugs = session.models().await.unwrap();
    assert_eq!(
        slugs,
        vec!["text-davinci-002-render-sha".to_string(), "gpt-4".to_string()]
    );

    let history = session.get_conversation("conv-1").await.unwrap();
    assert_eq!(history["title"], "t");
}

#[tokio::test]
async fn get_conversations_unwraps_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "conv-1"}, {"id": "conv-2"}],
            "total": 2,
        })))
        .mount(&server)
        .await;

    let session = session("a@x", &server.uri());
    let items = session.get_conversations(0, 20).await.unwrap();
    assert_eq!(items.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn gen_title_returns_title() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/conversation/gen_title/conv-1"))
        .and(body_partial_json(json!({"message_id": "msg-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "A chat"})))
        .mount(&server)
        .await;

    let session = session("a@x", &server.uri());
    let title = session.gen_title("conv-1", "msg-1").await.unwrap();
    assert_eq!(title, "A chat");
}

#[tokio::test]
async fn delete_conversation_flips_visibility() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/conversation/conv-1"))
        .and(body_partial_json(json!({"is_visible": false})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = session("a@x", &server.uri());
    session.delete_conversation("conv-1").await.unwrap();
}

#[tokio::test]
async fn clear_conversations_patches_the_collection() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/conversations"))
        .and(body_partial_json(json!({"is_visible": false})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = session("a@x", &server.uri());
    session.clear_conversations().await.unwrap();
}

#[tokio::test]
async fn share_conversation_creates_then_publishes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/share/create"))
        .and(body_partial_json(json!({
            "conversation_id": "conv-1",
            "current_node_id": "msg-9",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "share_id": "share-1",
            "share_url": "https://chat.example/share/share-1",
            "title": "Suggested title",
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/share/share-1"))
        .and(body_partial_json(json!({
            "is_public": true,
            "highlighted_message_id": "msg-9",
            "title": "Suggested title",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = session("a@x", &server.uri());
    let url = session
        .share_conversation("conv-1", "msg-9", None)
        .await
        .unwrap();
    assert_eq!(url, "https://chat.example/share/share-1");
}

#[tokio::test]
async fn change_title_patches_conversation() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/conversation/conv-1"))
        .and(body_partial_json(json!({"title": "renamed"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = session("a@x", &server.uri());
    session.change_title("conv-1", "renamed").await.unwrap();
}

#[tokio::test]
async fn plugins_surface_round_trips() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aip/p"))
        .and(query_param("statuses", "approved"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "plugin-1"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/aip/p/domain"))
        .and(query_param("domain", "tools.example.com"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "plugin-2", "verified": false})),
        )
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/aip/p/plugin-2/user-settings"))
        .and(body_partial_json(json!({"is_installed": true})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = session("a@x", &server.uri());
    let plugins = session.get_plugins(0, 250, "approved").await.unwrap();
    assert_eq!(plugins["items"][0]["id"], "plugin-1");

    let unverified = session
        .get_unverified_plugin("tools.example.com", true)
        .await
        .unwrap();
    assert_eq!(unverified["id"], "plugin-2");
}

#[tokio::test]
async fn admin_calls_surface_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conversation/conv-404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;

    let session = session("a@x", &server.uri());
    let err = session.get_conversation("conv-404").await.unwrap_err();
    assert_eq!(err.upstream_status(), Some(404));
}
