//! The same workflows over the SQLite-backed store
//!
//! The engine never special-cases a backend; these tests pin that the
//! sqlx/JSON1 store honors the same conditional-write and query semantics
//! the in-memory store does.

use std::sync::Arc;

use futures::StreamExt;
use jamlink_common::config::EngineSettings;
use jamlink_common::models::{
    ApplicationStatus, MemberProfile, NewApplication, NewCollaboration, NewInvitation,
};
use jamlink_common::store::SqliteStore;
use jamlink_common::Error;
use jamlink_engine::{InviteDecision, JamlinkEngine, ReviewDecision};

async fn engine() -> JamlinkEngine {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let store = SqliteStore::open_in_memory().await.expect("open sqlite");
    JamlinkEngine::new(Arc::new(store), EngineSettings::default())
}

async fn create_collab(engine: &JamlinkEngine, max_participants: Option<u32>) -> String {
    engine
        .collaborations
        .create(NewCollaboration {
            creator_id: "creator".into(),
            creator_name: "Ana".into(),
            creator_avatar: None,
            creator_instrument: Some("drums".into()),
            title: "Tape loops".into(),
            description: "Ambient collaboration".into(),
            genre: "ambient".into(),
            instruments: Default::default(),
            collaboration_type: "remote".into(),
            privacy: None,
            max_participants,
            requirements: vec![],
            timeline: None,
            tags: vec![],
        })
        .await
        .expect("create collaboration")
        .id
}

#[tokio::test]
async fn full_accept_path_over_sqlite() {
    let engine = engine().await;
    let collab_id = create_collab(&engine, Some(2)).await;

    let app = engine
        .applications
        .apply(NewApplication {
            collaboration_id: collab_id.clone(),
            applicant_id: "alice".into(),
            applicant_name: "Alice".into(),
            applicant_avatar: None,
            instrument: "cello".into(),
            experience: "conservatory".into(),
            motivation: "long drones".into(),
        })
        .await
        .expect("apply");

    let reviewed = engine
        .applications
        .review(&app.id, "creator", ReviewDecision::Accepted, None)
        .await
        .expect("accept");
    assert_eq!(reviewed.status, ApplicationStatus::Accepted);

    let collab = engine.collaborations.get(&collab_id).await.expect("get");
    assert_eq!(collab.current_participants, 2);
    assert!(collab.is_participant("alice"));

    // Roster is now full; the invite path must bounce at accept time.
    let invitation = engine
        .invitations
        .invite(NewInvitation {
            collaboration_id: collab_id.clone(),
            from_user_id: "creator".into(),
            from_user_name: "Ana".into(),
            to_user_id: "bob".into(),
            message: "one more?".into(),
        })
        .await
        .expect("invite");

    let err = engine
        .invitations
        .respond(
            &invitation.id,
            "bob",
            InviteDecision::Accepted(MemberProfile {
                user_name: "Bob".into(),
                user_avatar: None,
                role: "musician".into(),
                instrument: "tape machine".into(),
            }),
        )
        .await
        .expect_err("no slot left");
    assert!(matches!(err, Error::RosterFull { max: 2 }));
}

#[tokio::test]
async fn duplicate_application_detected_through_json_query() {
    let engine = engine().await;
    let collab_id = create_collab(&engine, None).await;

    let apply = |applicant: &str| NewApplication {
        collaboration_id: collab_id.clone(),
        applicant_id: applicant.to_string(),
        applicant_name: applicant.to_string(),
        applicant_avatar: None,
        instrument: "guitar".into(),
        experience: "bar bands".into(),
        motivation: "miss playing".into(),
    };

    engine.applications.apply(apply("carl")).await.expect("first");
    let err = engine
        .applications
        .apply(apply("carl"))
        .await
        .expect_err("pending duplicate");
    assert!(matches!(err, Error::DuplicateApplication));
}

#[tokio::test]
async fn subscriptions_stream_collaboration_changes() {
    let engine = engine().await;
    let collab_id = create_collab(&engine, None).await;

    let mut stream = engine
        .collaborations
        .subscribe(&collab_id)
        .await
        .expect("subscribe");

    engine
        .collaborations
        .update(&collab_id, serde_json::json!({"description": "Now with field recordings"}))
        .await
        .expect("update");

    let change = stream.next().await.expect("change delivered");
    assert_eq!(change.id, collab_id);
    let doc = change.doc.expect("upsert carries the document");
    assert_eq!(doc.body["description"], "Now with field recordings");
}
