use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chat_protocol::{Envelope, MessageType, SenderKind};

use crate::setup::{ScriptedLlm, TestHarness, test_config};


fn user_message(session_id: Option<&str>, content: &str) -> Envelope {
    Envelope {
        message_type: MessageType::UserMessage,
        session_id: session_id.map(str::to_owned),
        content: Some(content.to_owned()),
        file_id: None,
        file_url: None,
        model_id: None,
        timestamp: chrono::Utc::now(),
        sender: SenderKind::User,
        metadata: BTreeMap::new(),
        error: None,
    }
}

fn admin_envelope(message_type: MessageType, session_id: &str) -> Envelope {
    Envelope {
        message_type,
        session_id: Some(session_id.to_owned()),
        content: None,
        file_id: None,
        file_url: None,
        model_id: None,
        timestamp: chrono::Utc::now(),
        sender: SenderKind::Admin,
        metadata: BTreeMap::new(),
        error: None,
    }
}

#[tokio::test]
async fn s1_round_trip_user_message_happy_path() {
    let harness = TestHarness::start(test_config(), Arc::new(ScriptedLlm::chunks(vec!["Hel", "lo"])));
    let mut ws = harness.connect("u1").await;

    ws.send_json(&user_message(None, "hi")).await;

    let loading: Envelope = ws.receive_json().await;
    assert_eq!(loading.message_type, MessageType::Loading);

    let first: Envelope = ws.receive_json().await;
    assert_eq!(first.message_type, MessageType::AiResponse);
    assert_eq!(first.content.as_deref(), Some("Hel"));

    let second: Envelope = ws.receive_json().await;
    assert_eq!(second.content.as_deref(), Some("lo"));
    assert_eq!(second.metadata.get("done").map(String::as_str), Some("true"));

    let session_id = second.session_id.expect("session bound by now");
    let session = harness.session_manager.get(&session_id).unwrap();
    assert_eq!(session.messages.len(), 1, "only the user message is persisted in-memory");
}

#[tokio::test]
async fn s2_cross_user_session_access_is_rejected() {
    let harness = TestHarness::start(test_config(), Arc::new(ScriptedLlm::chunks(vec!["hi"])));
    let mut owner_ws = harness.connect("u1").await;
    owner_ws.send_json(&user_message(None, "hi")).await;
    let _loading: Envelope = owner_ws.receive_json().await;
    let reply: Envelope = owner_ws.receive_json().await;
    let session_id = reply.session_id.clone().unwrap();

    let mut intruder_ws = harness.connect("u2").await;
    intruder_ws.send_json(&user_message(Some(&session_id), "x")).await;
    let error: Envelope = intruder_ws.receive_json().await;
    assert_eq!(error.message_type, MessageType::Error);
    let info = error.error.expect("error envelope carries error info");
    assert_eq!(info.code, chat_protocol::ErrorCode::Unauthorized);
    assert!(!info.recoverable);

    let session = harness.session_manager.get(&session_id).unwrap();
    assert_eq!(session.messages.len(), 1, "the intruder's message was never stored");
}

#[tokio::test]
async fn s3_rate_limit_third_message_in_window_is_rejected() {
    let mut config = test_config();
    config.rate_window = Duration::from_secs(60);
    config.rate_limit = 2;
    let harness = TestHarness::start(config, Arc::new(ScriptedLlm::chunks(vec!["ok"])));
    let mut ws = harness.connect("u1").await;

    ws.send_json(&user_message(None, "one")).await;
    let _loading1: Envelope = ws.receive_json().await;
    let _reply1: Envelope = ws.receive_json().await;

    ws.send_json(&user_message(None, "two")).await;
    let _loading2: Envelope = ws.receive_json().await;
    let _reply2: Envelope = ws.receive_json().await;

    ws.send_json(&user_message(None, "three")).await;
    let error: Envelope = ws.receive_json().await;
    assert_eq!(error.message_type, MessageType::Error);
    let info = error.error.unwrap();
    assert_eq!(info.code, chat_protocol::ErrorCode::TooManyRequests);
    assert!(info.recoverable);
    assert!(info.retry_after_ms > 0 && info.retry_after_ms <= 60_000);
}

#[tokio::test]
async fn s4_admin_takeover_and_broadcast_then_leave() {
    let harness = TestHarness::start(test_config(), Arc::new(ScriptedLlm::chunks(vec!["hi"])));
    let mut user_ws = harness.connect("u1").await;
    user_ws.send_json(&user_message(None, "hi")).await;
    let _loading: Envelope = user_ws.receive_json().await;
    let reply: Envelope = user_ws.receive_json().await;
    let session_id = reply.session_id.clone().unwrap();

    let mut admin_ws = harness.connect_as("a1", Some("Alice"), Some(chat_protocol::principal::ROLE_ADMIN)).await;
    admin_ws.send_json(&admin_envelope(MessageType::AdminJoin, &session_id)).await;

    let join_on_user: Envelope = user_ws.receive_json().await;
    assert_eq!(join_on_user.message_type, MessageType::AdminJoin);
    assert_eq!(join_on_user.content.as_deref(), Some("Administrator Alice has joined the session"));
    assert_eq!(join_on_user.metadata.get("admin_id").map(String::as_str), Some("a1"));
    assert_eq!(join_on_user.metadata.get("admin_name").map(String::as_str), Some("Alice"));

    let _join_echo_on_admin: Envelope = admin_ws.receive_json().await;

    admin_ws.send_json(&admin_envelope(MessageType::AdminLeave, &session_id)).await;
    let _leave_on_user: Envelope = user_ws.receive_json().await;

    let session = harness.session_manager.get(&session_id).unwrap();
    assert!(session.admin_assisted);
    assert!(session.assisting_admin_id.is_empty());
}

#[tokio::test]
async fn s5_llm_timeout_surfaces_llm_timeout_error() {
    let mut config = test_config();
    config.llm_stream_timeout = Duration::from_millis(100);
    let harness = TestHarness::start(config, Arc::new(ScriptedLlm::stalling()));
    let mut ws = harness.connect("u1").await;

    ws.send_json(&user_message(None, "hi")).await;
    let loading: Envelope = ws.receive_json().await;
    assert_eq!(loading.message_type, MessageType::Loading);

    let error: Envelope = ws.receive_json().await;
    assert_eq!(error.message_type, MessageType::Error);
    let info = error.error.unwrap();
    assert_eq!(info.code, chat_protocol::ErrorCode::LlmTimeout);
    assert!(info.recoverable);
}

#[tokio::test]
async fn s6_double_shutdown_does_not_panic_and_stats_stay_consistent() {
    let harness = TestHarness::start(test_config(), Arc::new(ScriptedLlm::chunks(vec!["hi"])));
    let session_manager = harness.session_manager.clone();
    let router_a = harness.router.clone();
    let router_b = harness.router.clone();

    let (a, b) = tokio::join!(router_a.shutdown(), router_b.shutdown());
    let _: ((), ()) = (a, b);

    let stats = session_manager.get_memory_stats();
    assert_eq!(stats.active + stats.inactive, stats.total);
}
