//! Session lifecycle: authentication, turn streaming, notification order,
//! and message persistence.

mod common;

use common::{text_pass, MockCompletion, MockEmbedder};
use serde_json::json;
use std::sync::Arc;
use studyrag::protocol::{Notification, NotificationKind};
use studyrag::providers::{CompletionEvent, ToolCallRequest};
use studyrag::session::{ChatSession, Flow};
use studyrag::store::SqliteStore;
use studyrag::tools::RetrievalOptions;
use studyrag::types::Role;
use tokio::sync::mpsc;

struct Harness {
    store: SqliteStore,
    session: ChatSession,
    rx: mpsc::Receiver<Notification>,
    completion: MockCompletion,
    token: String,
    workspace_id: String,
    user_id: String,
}

async fn harness(passes: Vec<Vec<CompletionEvent>>) -> Harness {
    common::setup_tracing();
    let store = common::memory_store().await;

    let user = studyrag_access::get_or_create_user(&store.db, "alice")
        .await
        .unwrap();
    let auth = studyrag_access::create_session(&store.db, &user.id, None)
        .await
        .unwrap();
    let workspace = store
        .create_workspace(&user.id, "Biology", true)
        .await
        .unwrap();

    let completion = MockCompletion::new(passes);
    let (tx, rx) = mpsc::channel(64);
    let session = ChatSession::new(
        store.clone(),
        store.db.clone(),
        Arc::new(MockEmbedder::new(vec![1.0, 0.0])),
        Arc::new(completion.clone()),
        tx,
        workspace.id.clone(),
        RetrievalOptions::default(),
    );

    Harness {
        store,
        session,
        rx,
        completion,
        token: auth.token,
        workspace_id: workspace.id,
        user_id: user.id,
    }
}

fn auth_frame(token: &str) -> String {
    json!({ "type": "AUTH", "data": { "token": token } }).to_string()
}

fn chat_frame(message: &str, chat_id: Option<&str>) -> String {
    json!({ "type": "CHAT", "data": { "message": message, "chatId": chat_id } }).to_string()
}

/// Drains everything currently buffered on the notification channel.
fn drain(rx: &mut mpsc::Receiver<Notification>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        notifications.push(notification);
    }
    notifications
}

async fn count_rows(store: &SqliteStore, table: &str) -> i64 {
    let conn = store.db.connect().unwrap();
    let mut rows = conn
        .query(&format!("SELECT COUNT(*) FROM {table}"), ())
        .await
        .unwrap();
    rows.next().await.unwrap().unwrap().get(0).unwrap()
}

#[tokio::test]
async fn test_unknown_workspace_closes_with_404() {
    let mut h = harness(vec![]).await;
    let (tx, mut rx) = mpsc::channel(8);
    let mut session = ChatSession::new(
        h.store.clone(),
        h.store.db.clone(),
        Arc::new(MockEmbedder::new(vec![1.0])),
        Arc::new(h.completion.clone()),
        tx,
        "no-such-workspace".to_string(),
        RetrievalOptions::default(),
    );

    assert_eq!(session.open().await, Flow::Close);
    let notifications = drain(&mut rx);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status, 404);
    assert_eq!(notifications[0].kind, NotificationKind::Error);

    // The original harness session was never used.
    assert_eq!(h.session.open().await, Flow::Continue);
    assert!(drain(&mut h.rx).is_empty());
}

#[tokio::test]
async fn test_invalid_token_gets_one_401_then_close() {
    let mut h = harness(vec![]).await;
    assert_eq!(h.session.open().await, Flow::Continue);
    assert_eq!(h.session.handle_raw(&auth_frame("bogus")).await, Flow::Close);

    let notifications = drain(&mut h.rx);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status, 401);
    assert_eq!(notifications[0].kind, NotificationKind::Error);

    // Frames after close are ignored without further output.
    assert_eq!(
        h.session.handle_raw(&chat_frame("hello?", None)).await,
        Flow::Close
    );
    assert!(drain(&mut h.rx).is_empty());
    assert_eq!(count_rows(&h.store, "chats").await, 0);
    assert_eq!(count_rows(&h.store, "messages").await, 0);
}

#[tokio::test]
async fn test_chat_before_auth_is_rejected() {
    let mut h = harness(vec![]).await;
    assert_eq!(h.session.open().await, Flow::Continue);
    assert_eq!(
        h.session.handle_raw(&chat_frame("hi", None)).await,
        Flow::Close
    );

    let notifications = drain(&mut h.rx);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status, 401);
    assert_eq!(count_rows(&h.store, "messages").await, 0);
}

#[tokio::test]
async fn test_malformed_frame_closes_with_400() {
    let mut h = harness(vec![]).await;
    assert_eq!(h.session.open().await, Flow::Continue);
    assert_eq!(h.session.handle_raw("{not json").await, Flow::Close);

    let notifications = drain(&mut h.rx);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status, 400);
}

#[tokio::test]
async fn test_fresh_chat_turn_streams_in_order() {
    let mut h = harness(vec![text_pass(&["Mito", "chondria ", "make ATP."])]).await;
    assert_eq!(h.session.open().await, Flow::Continue);

    let token = h.token.clone();
    assert_eq!(h.session.handle_raw(&auth_frame(&token)).await, Flow::Continue);
    assert_eq!(
        h.session
            .handle_raw(&chat_frame("what do mitochondria do?", None))
            .await,
        Flow::Continue
    );

    let notifications = drain(&mut h.rx);
    let kinds: Vec<Option<String>> = notifications
        .iter()
        .map(|n| n.data_type().map(str::to_string))
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some("AUTH".to_string()),
            Some("CHAT_INFO".to_string()),
            Some("USER_MESSAGE".to_string()),
            Some("MESSAGE".to_string()),
            Some("MESSAGE".to_string()),
            Some("MESSAGE".to_string()),
            Some("FINAL_MESSAGE".to_string()),
        ]
    );

    // The new chat starts with the default title.
    let chat_info = notifications[1].data.as_ref().unwrap();
    assert_eq!(chat_info["chat"]["title"], "New Chat");

    // The final message equals the concatenated deltas.
    let deltas: String = notifications[3..6]
        .iter()
        .map(|n| n.data.as_ref().unwrap()["delta"].as_str().unwrap())
        .collect();
    assert_eq!(deltas, "Mitochondria make ATP.");
    let final_message = notifications[6].data.as_ref().unwrap();
    assert_eq!(final_message["message"]["content"], "Mitochondria make ATP.");

    // Persistence: indexes are gap-free and the assistant follows the user.
    let chat_id = chat_info["chat"]["id"].as_str().unwrap();
    let messages = h.store.list_messages(chat_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].index, 0);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "what do mitochondria do?");
    assert_eq!(messages[1].index, 1);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Mitochondria make ATP.");

    // Model input: system instructions first, the user message last.
    let requests = h.completion.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages[0].role, "system");
    assert_eq!(
        requests[0].messages.last().unwrap().content.as_deref(),
        Some("what do mitochondria do?")
    );
    assert!(!requests[0].tools.is_empty());
}

#[tokio::test]
async fn test_second_turn_continues_the_same_chat() {
    let mut h = harness(vec![
        text_pass(&["First answer."]),
        text_pass(&["Second answer."]),
    ])
    .await;
    assert_eq!(h.session.open().await, Flow::Continue);
    let token = h.token.clone();
    h.session.handle_raw(&auth_frame(&token)).await;

    h.session.handle_raw(&chat_frame("first question", None)).await;
    let first = drain(&mut h.rx);
    let chat_id = first
        .iter()
        .find(|n| n.data_type() == Some("CHAT_INFO"))
        .unwrap()
        .data
        .as_ref()
        .unwrap()["chat"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    h.session
        .handle_raw(&chat_frame("second question", Some(&chat_id)))
        .await;
    let second = drain(&mut h.rx);

    // The existing chat is re-announced before the turn streams.
    assert_eq!(second[0].data_type(), Some("CHAT_INFO"));
    assert_eq!(second[0].status, 200);
    let announced = second[0].data.as_ref().unwrap();
    assert_eq!(announced["chat"]["id"], chat_id.as_str());
    assert_eq!(announced["chat"]["title"], "New Chat");
    assert_eq!(second[1].data_type(), Some("USER_MESSAGE"));

    let messages = h.store.list_messages(&chat_id).await.unwrap();
    assert_eq!(messages.len(), 4);
    let indexes: Vec<i64> = messages.iter().map(|m| m.index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3]);
    assert_eq!(messages[3].content, "Second answer.");

    // The second request carries the first turn as history.
    let requests = h.completion.requests();
    let history: Vec<Option<&str>> = requests[1]
        .messages
        .iter()
        .map(|m| m.content.as_deref())
        .collect();
    assert!(history.contains(&Some("first question")));
    assert!(history.contains(&Some("First answer.")));
    assert_eq!(history.last().unwrap(), &Some("second question"));
}

#[tokio::test]
async fn test_chat_from_another_workspace_is_not_found() {
    let mut h = harness(vec![text_pass(&["ok"])]).await;
    assert_eq!(h.session.open().await, Flow::Continue);
    let token = h.token.clone();
    h.session.handle_raw(&auth_frame(&token)).await;
    drain(&mut h.rx);

    let other = h
        .store
        .create_workspace(&h.user_id, "History", true)
        .await
        .unwrap();
    let foreign_chat = h
        .store
        .create_chat(&h.user_id, &other.id, "Elsewhere")
        .await
        .unwrap();

    let flow = h
        .session
        .handle_raw(&chat_frame("hello", Some(&foreign_chat.id)))
        .await;
    assert_eq!(flow, Flow::Continue);

    let notifications = drain(&mut h.rx);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status, 404);
    assert_eq!(notifications[0].kind, NotificationKind::Error);

    // The session is still usable afterwards.
    let flow = h.session.handle_raw(&chat_frame("hello again", None)).await;
    assert_eq!(flow, Flow::Continue);
    let notifications = drain(&mut h.rx);
    assert_eq!(
        notifications.last().unwrap().data_type(),
        Some("FINAL_MESSAGE")
    );
}

#[tokio::test]
async fn test_private_workspace_rejects_non_owner() {
    let mut h = harness(vec![]).await;

    let outsider = studyrag_access::get_or_create_user(&h.store.db, "mallory")
        .await
        .unwrap();
    let outsider_auth = studyrag_access::create_session(&h.store.db, &outsider.id, None)
        .await
        .unwrap();
    let private = h
        .store
        .create_workspace(&h.user_id, "Secret", false)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let mut session = ChatSession::new(
        h.store.clone(),
        h.store.db.clone(),
        Arc::new(MockEmbedder::new(vec![1.0])),
        Arc::new(h.completion.clone()),
        tx,
        private.id,
        RetrievalOptions::default(),
    );

    assert_eq!(session.open().await, Flow::Continue);
    // Authentication itself succeeds; the visibility check is per turn.
    assert_eq!(
        session.handle_raw(&auth_frame(&outsider_auth.token)).await,
        Flow::Continue
    );
    assert_eq!(session.handle_raw(&chat_frame("hi", None)).await, Flow::Close);

    let notifications = drain(&mut rx);
    assert_eq!(notifications.last().unwrap().status, 401);
    assert_eq!(count_rows(&h.store, "messages").await, 0);
}

#[tokio::test]
async fn test_tool_call_turn_emits_tool_events_and_renames() {
    let mut h = harness(vec![
        vec![
            CompletionEvent::ToolCall(ToolCallRequest {
                id: "call-1".to_string(),
                name: "change_chat_name".to_string(),
                arguments: json!({ "title": "Mitochondria" }).to_string(),
            }),
            CompletionEvent::Done {
                finish_reason: Some("tool_calls".to_string()),
            },
        ],
        text_pass(&["Renamed the chat."]),
    ])
    .await;
    assert_eq!(h.session.open().await, Flow::Continue);
    let token = h.token.clone();
    h.session.handle_raw(&auth_frame(&token)).await;
    h.session.handle_raw(&chat_frame("name this chat", None)).await;

    let notifications = drain(&mut h.rx);
    let kinds: Vec<Option<&str>> = notifications.iter().map(|n| n.data_type()).collect();

    // The rename side channel races the forwarded tool events, so only the
    // relative order within each pipeline is asserted.
    let position = |kind: &str| kinds.iter().position(|k| *k == Some(kind)).unwrap();
    assert!(position("TOOL_CALL") < position("TOOL_RESULT"));
    assert!(position("TOOL_RESULT") < position("FINAL_MESSAGE"));
    assert!(kinds.contains(&Some("CHAT_INFO_UPDATE")));
    assert_eq!(kinds.last().unwrap(), &Some("FINAL_MESSAGE"));

    // The tool actually ran.
    let chat_id = notifications
        .iter()
        .find(|n| n.data_type() == Some("CHAT_INFO"))
        .unwrap()
        .data
        .as_ref()
        .unwrap()["chat"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let chat = h.store.get_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.title, "Mitochondria");

    // The second pass carried the tool result back to the model.
    let requests = h.completion.requests();
    assert_eq!(requests.len(), 2);
    let roles: Vec<&str> = requests[1].messages.iter().map(|m| m.role.as_str()).collect();
    assert!(roles.contains(&"tool"));
}

#[tokio::test]
async fn test_unknown_tool_request_does_not_abort_the_turn() {
    let mut h = harness(vec![
        vec![
            CompletionEvent::ToolCall(ToolCallRequest {
                id: "call-1".to_string(),
                name: "search_the_web".to_string(),
                arguments: "{}".to_string(),
            }),
            CompletionEvent::Done {
                finish_reason: Some("tool_calls".to_string()),
            },
        ],
        text_pass(&["I can only search the workspace documents."]),
    ])
    .await;
    assert_eq!(h.session.open().await, Flow::Continue);
    let token = h.token.clone();
    h.session.handle_raw(&auth_frame(&token)).await;

    let flow = h.session.handle_raw(&chat_frame("google it", None)).await;
    assert_eq!(flow, Flow::Continue);

    let notifications = drain(&mut h.rx);
    assert_eq!(
        notifications.last().unwrap().data_type(),
        Some("FINAL_MESSAGE")
    );

    // The failed lookup came back to the model as tool output.
    let result = notifications
        .iter()
        .find(|n| n.data_type() == Some("TOOL_RESULT"))
        .unwrap()
        .data
        .as_ref()
        .unwrap();
    assert_eq!(result["output"]["status"], 404);
    assert_eq!(result["output"]["success"], false);

    let requests = h.completion.requests();
    assert_eq!(requests.len(), 2);
    let roles: Vec<&str> = requests[1].messages.iter().map(|m| m.role.as_str()).collect();
    assert!(roles.contains(&"tool"));
}

#[tokio::test]
async fn test_failed_turn_keeps_user_message_and_session() {
    // No scripted passes: the first completion call fails outright.
    let mut h = harness(vec![text_pass(&["recovered"])]).await;
    assert_eq!(h.session.open().await, Flow::Continue);
    let token = h.token.clone();
    h.session.handle_raw(&auth_frame(&token)).await;
    drain(&mut h.rx);

    // Exhaust the single scripted pass so the next turn fails.
    h.session.handle_raw(&chat_frame("first", None)).await;
    let first = drain(&mut h.rx);
    let chat_id = first
        .iter()
        .find(|n| n.data_type() == Some("CHAT_INFO"))
        .unwrap()
        .data
        .as_ref()
        .unwrap()["chat"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let flow = h
        .session
        .handle_raw(&chat_frame("second", Some(&chat_id)))
        .await;
    assert_eq!(flow, Flow::Continue);

    let notifications = drain(&mut h.rx);
    let last = notifications.last().unwrap();
    assert_eq!(last.kind, NotificationKind::Error);
    assert_eq!(last.status, 500);

    // The user message survived; the assistant placeholder stayed empty.
    let messages = h.store.list_messages(&chat_id).await.unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].content, "second");
    assert_eq!(messages[3].content, "");
}

#[tokio::test]
async fn test_empty_assistant_rows_are_excluded_from_model_input() {
    let mut h = harness(vec![text_pass(&["later answer"])]).await;
    assert_eq!(h.session.open().await, Flow::Continue);
    let token = h.token.clone();
    h.session.handle_raw(&auth_frame(&token)).await;

    // A chat with an interrupted turn: user message plus empty placeholder.
    let chat = h
        .store
        .create_chat(&h.user_id, &h.workspace_id, "New Chat")
        .await
        .unwrap();
    h.store
        .append_turn(&chat.id, &h.user_id, "interrupted question")
        .await
        .unwrap();

    h.session
        .handle_raw(&chat_frame("new question", Some(&chat.id)))
        .await;
    drain(&mut h.rx);

    let requests = h.completion.requests();
    let messages = &requests[0].messages;
    assert!(messages
        .iter()
        .all(|m| !(m.role == "assistant" && m.content.as_deref() == Some(""))));
    assert!(messages
        .iter()
        .any(|m| m.content.as_deref() == Some("interrupted question")));
}
