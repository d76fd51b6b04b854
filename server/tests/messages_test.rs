//! Integration tests for the message endpoints: send, edit, batch delete,
//! attachments and the notification bookkeeping behind them.

mod common;

use common::{start_test_server, token_for, TestServer};
use courier_server::db::models::User;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};

async fn chat_list(server: &TestServer, user: &User) -> Vec<Value> {
    server
        .http
        .get(server.url("/api/chat"))
        .bearer_auth(token_for(&user.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn last_message_id(server: &TestServer, user: &User, chat_id: &str) -> Value {
    let chats = chat_list(server, user).await;
    let chat = chats
        .iter()
        .find(|c| c["id"] == chat_id)
        .expect("chat missing from list");
    chat["last_message"]["id"].clone()
}

async fn delete(server: &TestServer, user: &User, ids: &[&str]) -> reqwest::Response {
    server
        .http
        .put(server.url("/api/message/delete"))
        .bearer_auth(token_for(&user.id))
        .json(&json!({ "messageIds": ids }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_send_message_moves_last_message() {
    let server = start_test_server().await;
    let alice = server.seed_user("Alice").await;
    let bob = server.seed_user("Bob").await;
    let carol = server.seed_user("Carol").await;
    let group = server.create_group(&alice, "Trip", &[&bob, &carol]).await;
    let chat_id = group["id"].as_str().unwrap();

    let first = server.send_text(&alice, chat_id, "first").await;
    assert_eq!(first["sender"]["id"], alice.id.as_str());
    assert_eq!(first["chat"]["id"], chat_id);
    assert_eq!(last_message_id(&server, &bob, chat_id).await, first["id"]);

    let second = server.send_text(&bob, chat_id, "second").await;
    assert_eq!(last_message_id(&server, &alice, chat_id).await, second["id"]);

    // History is newest first
    let history: Vec<Value> = server
        .http
        .get(server.url(&format!("/api/message/{}", chat_id)))
        .bearer_auth(token_for(&carol.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["id"], second["id"]);
    assert_eq!(history[1]["id"], first["id"]);
}

#[tokio::test]
async fn test_send_rejects_empty_and_outsiders() {
    let server = start_test_server().await;
    let alice = server.seed_user("Alice").await;
    let bob = server.seed_user("Bob").await;
    let carol = server.seed_user("Carol").await;
    let mallory = server.seed_user("Mallory").await;
    let group = server.create_group(&alice, "Trip", &[&bob, &carol]).await;
    let chat_id = group["id"].as_str().unwrap().to_string();

    let empty = server
        .http
        .post(server.url("/api/message"))
        .bearer_auth(token_for(&alice.id))
        .multipart(Form::new().text("chatId", chat_id.clone()).text("content", "  "))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);
    let body: Value = empty.json().await.unwrap();
    assert_eq!(body["status"], "Client error");

    let outsider = server
        .http
        .post(server.url("/api/message"))
        .bearer_auth(token_for(&mallory.id))
        .multipart(Form::new().text("chatId", chat_id.clone()).text("content", "hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(outsider.status(), 403);

    let history = server
        .http
        .get(server.url(&format!("/api/message/{}", chat_id)))
        .bearer_auth(token_for(&mallory.id))
        .send()
        .await
        .unwrap();
    assert_eq!(history.status(), 403);
}

#[tokio::test]
async fn test_file_attachment_can_be_fetched() {
    let server = start_test_server().await;
    let alice = server.seed_user("Alice").await;
    let bob = server.seed_user("Bob").await;
    let group = server.create_group(&alice, "Trip", &[&bob, &server.seed_user("Carol").await]).await;
    let chat_id = group["id"].as_str().unwrap().to_string();

    let contents = b"packing list: tent, stove".to_vec();
    let form = Form::new()
        .text("chatId", chat_id)
        .part("attachment", Part::bytes(contents.clone()).file_name("notes.txt"));
    let resp = server
        .http
        .post(server.url("/api/message"))
        .bearer_auth(token_for(&alice.id))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let message: Value = resp.json().await.unwrap();

    let attachment = &message["attachment"];
    assert_eq!(attachment["kind"], "generic_file");
    assert_eq!(attachment["name"], "notes.txt");
    assert_eq!(attachment["size"], contents.len() as u64);

    let key = attachment["key"].as_str().unwrap();
    let fetched = server
        .http
        .get(server.url(&format!("/api/message/files/{}", key)))
        .bearer_auth(token_for(&bob.id))
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), 200);
    assert_eq!(fetched.bytes().await.unwrap().to_vec(), contents);

    let missing = server
        .http
        .get(server.url("/api/message/files/does-not-exist"))
        .bearer_auth(token_for(&bob.id))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_image_attachment_is_served_from_media_mount() {
    let server = start_test_server().await;
    let alice = server.seed_user("Alice").await;
    let bob = server.seed_user("Bob").await;
    let chat: Value = server
        .http
        .post(server.url("/api/chat"))
        .bearer_auth(token_for(&alice.id))
        .json(&json!({ "userId": bob.id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let pixels = vec![0x89, b'P', b'N', b'G', 1, 2, 3, 4];
    let form = Form::new()
        .text("chatId", chat["id"].as_str().unwrap().to_string())
        .part("attachment", Part::bytes(pixels.clone()).file_name("photo.PNG"));
    let message: Value = server
        .http
        .post(server.url("/api/message"))
        .bearer_auth(token_for(&alice.id))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(message["attachment"]["kind"], "image");
    let url = message["attachment"]["url"].as_str().unwrap();
    assert!(url.starts_with("/media/images/"));

    let served = server.http.get(server.url(url)).send().await.unwrap();
    assert_eq!(served.status(), 200);
    assert_eq!(served.bytes().await.unwrap().to_vec(), pixels);
}

#[tokio::test]
async fn test_update_message_content_and_attachment_rules() {
    let server = start_test_server().await;
    let alice = server.seed_user("Alice").await;
    let bob = server.seed_user("Bob").await;
    let group = server.create_group(&alice, "Trip", &[&bob, &server.seed_user("Carol").await]).await;
    let chat_id = group["id"].as_str().unwrap();
    let message = server.send_text(&alice, chat_id, "helo").await;
    let message_id = message["id"].as_str().unwrap().to_string();

    let edited = server
        .http
        .put(server.url("/api/message/update"))
        .bearer_auth(token_for(&alice.id))
        .multipart(
            Form::new()
                .text("messageId", message_id.clone())
                .text("updatedContent", "hello"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(edited.status(), 200);
    let edited: Value = edited.json().await.unwrap();
    assert_eq!(edited["content"], "hello");

    // Someone else's message
    let foreign = server
        .http
        .put(server.url("/api/message/update"))
        .bearer_auth(token_for(&bob.id))
        .multipart(
            Form::new()
                .text("messageId", message_id.clone())
                .text("updatedContent", "hijacked"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status(), 403);

    // Clearing the text of a message without a file leaves nothing behind
    let emptied = server
        .http
        .put(server.url("/api/message/update"))
        .bearer_auth(token_for(&alice.id))
        .multipart(
            Form::new()
                .text("messageId", message_id.clone())
                .text("updatedContent", "")
                .text("msgFileRemoved", "true"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(emptied.status(), 400);

    // Edits never move last_message
    assert_eq!(last_message_id(&server, &bob, chat_id).await, message_id.as_str());
}

#[tokio::test]
async fn test_delete_falls_back_last_message_and_purges_notifications() {
    let server = start_test_server().await;
    let alice = server.seed_user("Alice").await;
    let bob = server.seed_user("Bob").await;
    let carol = server.seed_user("Carol").await;
    let group = server.create_group(&alice, "Trip", &[&bob, &carol]).await;
    let chat_id = group["id"].as_str().unwrap();

    let earlier = server.send_text(&bob, chat_id, "earlier").await;
    let latest = server.send_text(&alice, chat_id, "latest").await;
    let latest_id = latest["id"].as_str().unwrap();
    server
        .state
        .engine
        .on_message_created(latest_id)
        .await
        .unwrap();

    let bob_user = server.state.store.find_user(&bob.id).await.unwrap().unwrap();
    assert_eq!(bob_user.notifications, vec![latest_id.to_string()]);

    let resp = delete(&server, &alice, &[latest_id]).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["deleted"], 1);

    assert_eq!(last_message_id(&server, &carol, chat_id).await, earlier["id"]);
    for user in [&bob, &carol] {
        let record = server.state.store.find_user(&user.id).await.unwrap().unwrap();
        assert!(record.notifications.is_empty());
    }

    // Deleting the same id again is a no-op
    let again = delete(&server, &alice, &[latest_id]).await;
    assert_eq!(again.status(), 200);
    let body: Value = again.json().await.unwrap();
    assert_eq!(body["deleted"], 0);

    // Deleting the only remaining message clears last_message
    let earlier_id = earlier["id"].as_str().unwrap();
    assert_eq!(delete(&server, &bob, &[earlier_id]).await.status(), 200);
    assert_eq!(last_message_id(&server, &alice, chat_id).await, Value::Null);
}

#[tokio::test]
async fn test_only_the_sender_may_delete() {
    let server = start_test_server().await;
    let alice = server.seed_user("Alice").await;
    let bob = server.seed_user("Bob").await;
    let group = server.create_group(&alice, "Trip", &[&bob, &server.seed_user("Carol").await]).await;
    let chat_id = group["id"].as_str().unwrap();
    let message = server.send_text(&alice, chat_id, "keep me").await;

    let resp = delete(&server, &bob, &[message["id"].as_str().unwrap()]).await;
    assert_eq!(resp.status(), 403);
    assert!(server
        .state
        .store
        .find_message(message["id"].as_str().unwrap())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_group_teardown_flag_does_not_apply_to_live_chats() {
    let server = start_test_server().await;
    let alice = server.seed_user("Alice").await;
    let bob = server.seed_user("Bob").await;
    let group = server.create_group(&alice, "Trip", &[&bob, &server.seed_user("Carol").await]).await;
    let chat_id = group["id"].as_str().unwrap();

    let m1 = server.send_text(&alice, chat_id, "one").await;
    let m2 = server.send_text(&alice, chat_id, "two").await;
    let bobs = server.send_text(&bob, chat_id, "three").await;

    // An admin cannot use the flag to remove another member's message
    let resp = server
        .http
        .put(server.url("/api/message/delete"))
        .bearer_auth(token_for(&alice.id))
        .json(&json!({ "messageIds": [bobs["id"]], "isDeleteGroupRequest": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(last_message_id(&server, &alice, chat_id).await, bobs["id"]);

    assert_eq!(delete(&server, &bob, &[bobs["id"].as_str().unwrap()]).await.status(), 200);
    assert_eq!(last_message_id(&server, &alice, chat_id).await, m2["id"]);

    // The sender's own delete still recomputes last_message
    let resp = server
        .http
        .put(server.url("/api/message/delete"))
        .bearer_auth(token_for(&alice.id))
        .json(&json!({ "messageIds": [m2["id"]], "isDeleteGroupRequest": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(last_message_id(&server, &alice, chat_id).await, m1["id"]);
}

#[tokio::test]
async fn test_dismiss_notifications_returns_remainder() {
    let server = start_test_server().await;
    let alice = server.seed_user("Alice").await;
    let bob = server.seed_user("Bob").await;
    let group = server.create_group(&alice, "Trip", &[&bob, &server.seed_user("Carol").await]).await;
    let chat_id = group["id"].as_str().unwrap();

    let first = server.send_text(&alice, chat_id, "one").await;
    let second = server.send_text(&alice, chat_id, "two").await;
    for message in [&first, &second] {
        server
            .state
            .engine
            .on_message_created(message["id"].as_str().unwrap())
            .await
            .unwrap();
    }

    let remaining: Vec<Value> = server
        .http
        .put(server.url("/api/user/notifications/dismiss"))
        .bearer_auth(token_for(&bob.id))
        .json(&json!({ "notificationIds": [first["id"]] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["id"], second["id"]);
}
