//! Chat session lifecycle, forking and message sequencing tests.
//!
//! Require a PostgreSQL database with migrations applied:
//! `DATABASE_URL=... cargo test -p lectern-db -- --ignored`

use lectern_db::test_fixtures::TestDatabase;
use lectern_db::{
    ChatSessionRepository, CreateMessageRequest, Error, ForkSessionRequest, MessageMetadata,
    MessageRepository, MessageRole, SessionState, ToolRepository, UserRepository,
};

fn message(session_id: uuid::Uuid, content: &str) -> CreateMessageRequest {
    CreateMessageRequest {
        session_id,
        role: MessageRole::User,
        content: content.to_string(),
        metadata: MessageMetadata::default(),
    }
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_orphaned_fork_keeps_origin_sequence() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let a = t.session(&tool, &user).await;
    t.conversation(&a, 6).await;

    let b = t
        .db
        .sessions
        .fork(ForkSessionRequest {
            source_session_id: a.id,
            from_sequence: 5,
            user_id: None,
            title: Some("Branch".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(b.parent_session_id, Some(a.id));
    assert_eq!(b.fork_from_seq, Some(5));
    assert_eq!(t.db.messages.count_for_session(b.id).await.unwrap(), 5);

    t.db.sessions.hard_delete(a.id).await.unwrap();

    let b = t.db.sessions.get(b.id).await.unwrap().expect("fork survives");
    assert_eq!(b.parent_session_id, None);
    assert_eq!(b.fork_from_seq, Some(5));
    assert!(b.is_orphaned_fork());

    let orphans = t.db.sessions.list_orphaned_forks(user.id).await.unwrap();
    assert!(orphans.iter().any(|s| s.id == b.id));

    // The source's messages went with it; the fork's copies did not.
    assert_eq!(t.db.messages.count_for_session(a.id).await.unwrap(), 0);
    assert_eq!(t.db.messages.count_for_session(b.id).await.unwrap(), 5);

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_fork_copies_prefix_with_new_ids() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let source = t.session(&tool, &user).await;
    let original = t.conversation(&source, 4).await;

    let fork = t
        .db
        .sessions
        .fork(ForkSessionRequest {
            source_session_id: source.id,
            from_sequence: 2,
            user_id: None,
            title: None,
        })
        .await
        .unwrap();

    let copied = t.db.messages.list_for_session(fork.id).await.unwrap();
    assert_eq!(copied.len(), 2);
    for (copy, orig) in copied.iter().zip(&original) {
        assert_ne!(copy.id, orig.id);
        assert_eq!(copy.sequence, orig.sequence);
        assert_eq!(copy.content, orig.content);
    }

    // New turns in the fork continue after the copied prefix.
    let next = t.db.messages.append(message(fork.id, "new branch")).await.unwrap();
    assert_eq!(next.sequence, 3);

    let forks = t.db.sessions.list_forks(source.id).await.unwrap();
    assert_eq!(forks.len(), 1);

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_fork_past_last_message_rejected() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let source = t.session(&tool, &user).await;
    t.conversation(&source, 2).await;

    let err = t
        .db
        .sessions
        .fork(ForkSessionRequest {
            source_session_id: source.id,
            from_sequence: 3,
            user_id: None,
            title: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(t.db.sessions.list_forks(source.id).await.unwrap().is_empty());

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_session_cannot_be_its_own_parent() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let session = t.session(&tool, &user).await;

    let err = t
        .db
        .sessions
        .set_parent(session.id, Some(session.id))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));

    // The storage constraint rejects it too.
    let raw = sqlx::query("UPDATE chat_sessions SET parent_session_id = id WHERE id = $1")
        .bind(session.id)
        .execute(t.db.pool())
        .await;
    assert!(raw.is_err());

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_state_moves_active_to_completed_only() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let session = t.session(&tool, &user).await;
    assert_eq!(session.state, SessionState::Active);

    let done = t.db.sessions.complete(session.id).await.unwrap();
    assert_eq!(done.state, SessionState::Completed);
    assert!(done.ended_at.is_some());

    let err = t.db.sessions.complete(session.id).await.unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_soft_delete_independent_of_forks() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let source = t.session(&tool, &user).await;
    t.conversation(&source, 1).await;
    let fork = t
        .db
        .sessions
        .fork(ForkSessionRequest {
            source_session_id: source.id,
            from_sequence: 1,
            user_id: None,
            title: None,
        })
        .await
        .unwrap();

    t.db.sessions.soft_delete(source.id).await.unwrap();
    let listed = t.db.sessions.list_for_user(user.id).await.unwrap();
    assert!(!listed.iter().any(|s| s.id == source.id));

    let fork = t.db.sessions.get(fork.id).await.unwrap().unwrap();
    assert_eq!(fork.parent_session_id, Some(source.id));

    t.db.sessions.restore(source.id).await.unwrap();
    let listed = t.db.sessions.list_for_user(user.id).await.unwrap();
    assert!(listed.iter().any(|s| s.id == source.id));

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_duplicate_sequence_rejected() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let session = t.session(&tool, &user).await;

    t.db.messages
        .insert_at(message(session.id, "first"), 3)
        .await
        .unwrap();
    let err = t
        .db
        .messages
        .insert_at(message(session.id, "second"), 3)
        .await
        .unwrap_err();
    match err {
        Error::DuplicateSequence {
            session_id,
            sequence,
        } => {
            assert_eq!(session_id, session.id);
            assert_eq!(sequence, 3);
        }
        other => panic!("Expected DuplicateSequence, got {:?}", other),
    }

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_append_assigns_sequences_from_one() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let session = t.session(&tool, &user).await;

    let messages = t.conversation(&session, 3).await;
    let sequences: Vec<i32> = messages.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    let session = t.db.sessions.get(session.id).await.unwrap().unwrap();
    assert!(session.last_activity_at.is_some());

    let prefix = t.db.messages.list_up_to(session.id, 2).await.unwrap();
    assert_eq!(prefix.len(), 2);

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_append_to_missing_session_is_dangling() {
    let t = TestDatabase::new().await;
    let err = t
        .db
        .messages
        .append(message(uuid::Uuid::new_v4(), "lost"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DanglingReference(_)));
    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_metadata_enrichment_merges() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let session = t.session(&tool, &user).await;

    let mut initial = MessageMetadata::default();
    initial.model = Some("gpt-x".to_string());
    let msg = t
        .db
        .messages
        .append(CreateMessageRequest {
            session_id: session.id,
            role: MessageRole::Assistant,
            content: "answer".to_string(),
            metadata: initial,
        })
        .await
        .unwrap();

    let mut later = MessageMetadata::default();
    later.completion_tokens = Some(42);
    later.finish_reason = Some("stop".to_string());
    let updated = t.db.messages.update_metadata(msg.id, &later).await.unwrap();

    assert_eq!(updated.metadata.model.as_deref(), Some("gpt-x"));
    assert_eq!(updated.metadata.completion_tokens, Some(42));
    assert_eq!(updated.content, "answer");

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrations applied
async fn test_deleting_user_or_tool_removes_sessions() {
    let t = TestDatabase::new().await;
    let user = t.user("learner").await;
    let tool = t.tool("tutor").await;
    let session = t.session(&tool, &user).await;
    t.conversation(&session, 2).await;

    t.db.tools.hard_delete(tool.id).await.unwrap();
    assert!(t.db.sessions.get(session.id).await.unwrap().is_none());
    assert_eq!(t.db.messages.count_for_session(session.id).await.unwrap(), 0);

    let tool2 = t.tool("tutor").await;
    let session2 = t.session(&tool2, &user).await;
    t.db.users.hard_delete(user.id).await.unwrap();
    assert!(t.db.sessions.get(session2.id).await.unwrap().is_none());

    t.cleanup().await;
}
