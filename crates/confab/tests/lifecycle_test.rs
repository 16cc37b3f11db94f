//! Session lifecycle behavior: create, resume, model switch, idle sweep.

mod common;

use common::{UpstreamBehavior, aged_session, harness, harness_with};
use confab::session::{ResumeOptions, SessionServiceConfig};
use confab::storage::{HistoryMessage, MessageRole};

fn history(entries: &[(&str, MessageRole)]) -> Vec<HistoryMessage> {
    entries
        .iter()
        .map(|(content, role)| HistoryMessage::new(*role, *content))
        .collect()
}

#[tokio::test]
async fn create_session_is_idempotent() {
    let h = harness().await;

    let first = h.sessions.create_session("conv-a", "m1").await.unwrap();
    let second = h.sessions.create_session("conv-a", "m1").await.unwrap();

    assert_eq!(first.created_at, second.created_at);
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.commands_of_type("create_session").len(), 1);
}

#[tokio::test]
async fn concurrent_creates_yield_a_single_session() {
    let h = harness().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let sessions = h.sessions.clone();
        handles.push(tokio::spawn(async move {
            sessions.create_session("conv-race", "m1").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.commands_of_type("create_session").len(), 1);
}

#[tokio::test]
async fn resume_without_prior_session_creates_fresh_and_skips_empty_injection() {
    let h = harness().await;

    let session = h
        .sessions
        .resume_session("conv-b", &[], ResumeOptions::new("m1"))
        .await
        .unwrap();

    assert_eq!(session.model, "m1");
    assert!(h.registry.stats("conv-b").exists);
    // Empty history performs zero injection calls
    assert!(h.commands_of_type("inject_messages").is_empty());
    // The fallback path tried resume first
    assert_eq!(h.commands_of_type("resume_session").len(), 1);
    assert_eq!(h.commands_of_type("create_session").len(), 1);
}

#[tokio::test]
async fn resume_injects_only_the_most_recent_entries() {
    let h = harness().await;

    let turns = history(&[
        ("oldest", MessageRole::User),
        ("old answer", MessageRole::Assistant),
        ("recent", MessageRole::User),
        ("recent answer", MessageRole::Assistant),
    ]);

    let mut opts = ResumeOptions::new("m1");
    opts.max_history_messages = 2;
    h.sessions
        .resume_session("conv-c", &turns, opts)
        .await
        .unwrap();

    let injections = h.commands_of_type("inject_messages");
    assert_eq!(injections.len(), 1);
    let messages = injections[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    // Whole oldest entries are dropped, never split
    assert_eq!(messages[0]["content"], "recent");
    assert_eq!(messages[1]["content"], "recent answer");

    // Bookkeeping advanced with the injected turns
    assert_eq!(h.registry.stats("conv-c").message_count, 2);
}

#[tokio::test]
async fn resume_prefers_live_fresh_session() {
    let h = harness().await;

    let created = h.sessions.create_session("conv-d", "m1").await.unwrap();
    let resumed = h
        .sessions
        .resume_session("conv-d", &[], ResumeOptions::new("m2"))
        .await
        .unwrap();

    // The live session wins; no new upstream session was opened
    assert_eq!(resumed.model, "m1");
    assert_eq!(resumed.created_at, created.created_at);
    assert_eq!(h.commands_of_type("create_session").len(), 1);
    assert!(h.commands_of_type("resume_session").is_empty());
}

#[tokio::test]
async fn resume_destroys_stale_session_before_reconnecting() {
    let h = harness().await;

    // A session idle past the 30 minute timeout
    h.registry.put(aged_session("conv-e", "m1", 31 * 60));

    h.sessions
        .resume_session("conv-e", &[], ResumeOptions::new("m1"))
        .await
        .unwrap();

    assert_eq!(h.commands_of_type("destroy_session").len(), 1);
    assert_eq!(h.commands_of_type("create_session").len(), 1);

    // The replacement session is fresh
    let stats = h.registry.stats("conv-e");
    assert!(stats.exists);
    assert!(stats.idle_seconds.unwrap() < 60);
}

#[tokio::test]
async fn resume_reconnects_persisted_upstream_session() {
    let behavior = UpstreamBehavior {
        resume_succeeds: true,
        ..Default::default()
    };
    let h = harness_with(behavior, SessionServiceConfig::default()).await;

    let turns = history(&[("hello", MessageRole::User)]);
    let session = h
        .sessions
        .resume_session("conv-f", &turns, ResumeOptions::new("m1"))
        .await
        .unwrap();

    // Reconnected: no create, no injection needed
    assert!(h.commands_of_type("create_session").is_empty());
    assert!(h.commands_of_type("inject_messages").is_empty());
    assert_eq!(session.message_count, 1);
}

#[tokio::test]
async fn injection_failure_is_swallowed() {
    // Provider without the injection capability
    let behavior = UpstreamBehavior {
        capabilities: Vec::new(),
        ..Default::default()
    };
    let h = harness_with(behavior, SessionServiceConfig::default()).await;

    let turns = history(&[("hello", MessageRole::User)]);
    let session = h
        .sessions
        .resume_session("conv-g", &turns, ResumeOptions::new("m1"))
        .await
        .unwrap();

    // No injection was attempted, the conversation still proceeds and the
    // bookkeeping still advanced
    assert!(h.commands_of_type("inject_messages").is_empty());
    assert_eq!(session.conversation_id, "conv-g");
    assert_eq!(h.registry.stats("conv-g").message_count, 1);
}

#[tokio::test]
async fn same_model_switch_is_a_no_op() {
    let h = harness().await;

    let created = h.sessions.create_session("conv-h", "m1").await.unwrap();
    h.registry.add_messages("conv-h", 4);

    let unchanged = h
        .sessions
        .update_session_model("conv-h", "m1", &[])
        .await
        .unwrap();

    assert_eq!(unchanged.created_at, created.created_at);
    assert_eq!(h.registry.stats("conv-h").message_count, 4);
    // Nothing was destroyed or created beyond the original open
    assert!(h.commands_of_type("destroy_session").is_empty());
    assert_eq!(h.commands_of_type("create_session").len(), 1);
}

#[tokio::test]
async fn model_switch_replaces_session_and_transplants_history() {
    let h = harness().await;

    h.sessions.create_session("conv-i", "m1").await.unwrap();

    let turns = history(&[
        ("hello", MessageRole::User),
        ("hi!", MessageRole::Assistant),
    ]);
    let switched = h
        .sessions
        .update_session_model("conv-i", "m2", &turns)
        .await
        .unwrap();

    assert_eq!(switched.model, "m2");
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.commands_of_type("destroy_session").len(), 1);
    assert_eq!(h.commands_of_type("create_session").len(), 2);

    let injections = h.commands_of_type("inject_messages");
    assert_eq!(injections.len(), 1);
    assert_eq!(injections[0]["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn failed_switch_restores_the_original_model() {
    let behavior = UpstreamBehavior {
        fail_create_for: vec!["m2".to_string()],
        ..Default::default()
    };
    let h = harness_with(behavior, SessionServiceConfig::default()).await;

    h.sessions.create_session("conv-j", "m1").await.unwrap();

    let result = h.sessions.update_session_model("conv-j", "m2", &[]).await;
    assert!(result.is_err());

    // The compensating restore holds the conversation on its original model
    let stats = h.registry.stats("conv-j");
    assert!(stats.exists);
    assert_eq!(stats.model.as_deref(), Some("m1"));
}

#[tokio::test]
async fn double_switch_failure_evicts_the_session() {
    let behavior = UpstreamBehavior {
        fail_create_for: vec!["m1".to_string(), "m2".to_string()],
        ..Default::default()
    };
    let h = harness_with(behavior, SessionServiceConfig::default()).await;

    // Seed the registry directly; creates for m1 are scripted to fail
    h.registry.put(aged_session("conv-k", "m1", 0));

    let result = h.sessions.update_session_model("conv-k", "m2", &[]).await;
    assert!(result.is_err());
    assert!(!h.registry.stats("conv-k").exists);
}

#[tokio::test]
async fn destroy_session_evicts_despite_upstream_error() {
    let behavior = UpstreamBehavior {
        fail_destroy: true,
        ..Default::default()
    };
    let h = harness_with(behavior, SessionServiceConfig::default()).await;

    h.sessions.create_session("conv-l", "m1").await.unwrap();
    h.sessions.destroy_session("conv-l").await.unwrap();

    assert!(!h.registry.stats("conv-l").exists);
}

#[tokio::test]
async fn idle_sweep_evicts_only_sessions_past_the_timeout() {
    let h = harness().await;

    // 31 minutes idle vs 29 minutes idle against a 30 minute timeout
    h.registry.put(aged_session("conv-stale", "m1", 31 * 60));
    h.registry.put(aged_session("conv-fresh", "m1", 29 * 60));

    let cleaned = h.sessions.cleanup_idle_sessions().await;

    assert_eq!(cleaned, 1);
    assert!(!h.registry.stats("conv-stale").exists);
    assert!(h.registry.stats("conv-fresh").exists);
}

#[tokio::test]
async fn idle_sweep_survives_upstream_teardown_failures() {
    let behavior = UpstreamBehavior {
        fail_destroy: true,
        ..Default::default()
    };
    let h = harness_with(behavior, SessionServiceConfig::default()).await;

    h.registry.put(aged_session("conv-m", "m1", 31 * 60));
    h.registry.put(aged_session("conv-n", "m1", 31 * 60));

    let cleaned = h.sessions.cleanup_idle_sessions().await;

    // Both entries were evicted even though teardown failed upstream
    assert_eq!(cleaned, 2);
    assert!(h.registry.is_empty());
}
