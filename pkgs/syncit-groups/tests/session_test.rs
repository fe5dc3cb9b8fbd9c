// Copyright 2024 SynciT Team.
//
// Tests for GroupSession and SessionManager

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use syncit_groups::{
    EventDraft, EventType, GroupError, GroupId, GroupSession, GroupUpdate, GroupsConfig,
    ListenerState, MemberInvite, MemberRole, MemberStatus, Notification, OutboxNotifier,
    SessionManager, SessionUser, VisibleGroups,
};
use syncit_store::MemoryDocumentStore;

struct Harness {
    store: Arc<MemoryDocumentStore>,
    outbox: Arc<OutboxNotifier>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryDocumentStore::new()),
            outbox: Arc::new(OutboxNotifier::new()),
        }
    }

    async fn sign_in(&self, id: &str) -> GroupSession {
        self.sign_in_with(id, GroupsConfig::default()).await
    }

    async fn sign_in_with(&self, id: &str, config: GroupsConfig) -> GroupSession {
        GroupSession::start(
            SessionUser::new(id, id.to_uppercase()),
            self.store.clone(),
            self.outbox.clone(),
            config,
        )
        .await
        .expect("Failed to start session")
    }
}

async fn wait_until(session: &GroupSession, predicate: impl Fn(&VisibleGroups) -> bool) {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|view| predicate(view)))
        .await
        .expect("timed out waiting for the group view")
        .expect("group cache closed");
}

async fn wait_for_group(session: &GroupSession, group_id: GroupId) {
    wait_until(session, |view| view.group(group_id).is_some()).await;
}

fn draft(notes: &str) -> EventDraft {
    EventDraft {
        date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        time: None,
        notes: notes.to_string(),
        event_type: EventType::AllDay,
    }
}

fn invite(id: &str) -> MemberInvite {
    MemberInvite::new(id, id.to_uppercase())
}

fn accepted(id: &str) -> MemberInvite {
    MemberInvite {
        status: Some(MemberStatus::Accepted),
        ..invite(id)
    }
}

#[tokio::test]
async fn test_session_follows_created_groups() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    assert_ne!(alice.listener_state(), ListenerState::TornDown);

    let group = alice
        .create_group("Climbing", "Tuesdays", vec![invite("bob")], false)
        .await
        .unwrap();
    wait_for_group(&alice, group.id).await;
    assert_eq!(alice.listener_state(), ListenerState::Active);

    let cached = alice.get_group(group.id).await.unwrap();
    assert_eq!(cached.admin, "alice");
    assert_eq!(cached.member("alice").unwrap().role, MemberRole::Admin);
    assert_eq!(cached.status_of("bob"), Some(MemberStatus::Pending));
}

#[tokio::test]
async fn test_pending_invitee_sees_group_and_accepts() {
    let h = Harness::new();
    let alice = h.sign_in("A").await;
    let bob = h.sign_in("B").await;

    let group = alice
        .create_group("Book club", "", vec![invite("B")], false)
        .await
        .unwrap();
    wait_for_group(&bob, group.id).await;
    h.outbox.drain();

    bob.update_member_status(group.id, "B", MemberStatus::Accepted)
        .await
        .unwrap();

    for session in [&alice, &bob] {
        wait_until(session, |view| {
            view.group(group.id)
                .is_some_and(|g| g.status_of("B") == Some(MemberStatus::Accepted))
        })
        .await;
    }

    let sent = h.outbox.drain();
    assert!(matches!(&sent[..], [Notification::InviteAccepted { recipients, .. }] if recipients == &["A".to_string()]));
}

#[tokio::test]
async fn test_event_visibility_per_member() {
    let h = Harness::new();
    let a = h.sign_in("A").await;
    let b = h.sign_in("B").await;
    let c = h.sign_in("C").await;

    let group = a
        .create_group("Trip", "", vec![accepted("B"), accepted("C")], false)
        .await
        .unwrap();
    let event = a.add_event(group.id, draft("Ferry")).await.unwrap();

    for session in [&a, &b, &c] {
        wait_until(session, |view| {
            view.group(group.id).is_some_and(|g| g.event(event.id).is_some())
        })
        .await;
    }

    assert!(!a.is_event_new(&event));
    assert!(b.is_event_new(&event));
    assert!(c.is_event_new(&event));
    assert!(!a.has_new_events(group.id));

    assert!(b.mark_event_as_viewed(group.id, event.id).unwrap());
    assert!(!b.mark_event_as_viewed(group.id, event.id).unwrap());

    let seen_by_b = b.get_group(group.id).await.unwrap();
    assert!(!b.is_event_new(seen_by_b.event(event.id).unwrap()));
    assert!(!b.has_new_events(group.id));

    let seen_by_c = c.get_group(group.id).await.unwrap();
    assert!(c.is_event_new(seen_by_c.event(event.id).unwrap()));

    assert!(matches!(
        b.mark_event_as_viewed(group.id, 12345),
        Err(GroupError::EventNotFound { .. })
    ));
}

#[tokio::test]
async fn test_permissions_are_enforced() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    let bob = h.sign_in("bob").await;
    let carol = h.sign_in("carol").await;

    let group = alice
        .create_group("Choir", "", vec![accepted("bob"), invite("carol")], false)
        .await
        .unwrap();
    for session in [&bob, &carol] {
        wait_for_group(session, group.id).await;
    }

    let rename = GroupUpdate {
        name: Some("Bob's choir".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        bob.update_group(group.id, rename).await,
        Err(GroupError::PermissionDenied(_))
    ));
    assert!(matches!(
        bob.remove_member(group.id, "carol").await,
        Err(GroupError::PermissionDenied(_))
    ));
    assert!(matches!(
        bob.update_member_status(group.id, "carol", MemberStatus::Accepted)
            .await,
        Err(GroupError::PermissionDenied(_))
    ));
    assert!(matches!(
        carol.add_event(group.id, draft("Rehearsal")).await,
        Err(GroupError::PermissionDenied(_))
    ));
    assert!(matches!(
        alice.block_group_creator(group.id).await,
        Err(GroupError::PermissionDenied(_))
    ));

    let event = alice.add_event(group.id, draft("Concert")).await.unwrap();
    wait_until(&bob, |view| {
        view.group(group.id).is_some_and(|g| g.event(event.id).is_some())
    })
    .await;
    assert!(matches!(
        bob.delete_event(group.id, event.id).await,
        Err(GroupError::PermissionDenied(_))
    ));

    let bobs = bob.add_event(group.id, draft("Warm-up")).await.unwrap();
    wait_until(&bob, |view| {
        view.group(group.id).is_some_and(|g| g.event(bobs.id).is_some())
    })
    .await;
    bob.delete_event(group.id, bobs.id).await.unwrap();
}

#[tokio::test]
async fn test_offline_mutation_is_applied_locally() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    let group = alice
        .create_group("Running", "", vec![invite("bob")], false)
        .await
        .unwrap();
    wait_for_group(&alice, group.id).await;

    h.store.set_online(false);
    let err = alice
        .promote_member_to_admin(group.id, "bob")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GroupError::TransientNetwork {
            applied_locally: true,
            ..
        }
    ));

    let cached = alice.get_group(group.id).await.unwrap();
    assert_eq!(cached.member("bob").unwrap().role, MemberRole::Admin);
    assert_eq!(cached.admin, "alice");

    let err = alice.delete_group_for_user(group.id).await.unwrap_err();
    assert!(matches!(
        err,
        GroupError::TransientNetwork {
            applied_locally: true,
            ..
        }
    ));
    assert!(alice.groups().is_empty());
}

#[tokio::test]
async fn test_offline_rejections_are_not_reported_as_applied() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    let group = alice
        .create_group("Running", "", vec![invite("bob")], false)
        .await
        .unwrap();
    wait_for_group(&alice, group.id).await;
    alice
        .update_member_status(group.id, "bob", MemberStatus::Declined)
        .await
        .unwrap();
    wait_until(&alice, |view| {
        view.group(group.id)
            .is_some_and(|g| g.status_of("bob") == Some(MemberStatus::Declined))
    })
    .await;

    h.store.set_online(false);
    let before = alice.view();

    let err = alice
        .update_member_status(group.id, "bob", MemberStatus::Accepted)
        .await
        .unwrap_err();
    assert!(matches!(err, GroupError::Validation(_)));

    let err = alice
        .promote_member_to_admin(group.id, "zed")
        .await
        .unwrap_err();
    assert!(matches!(err, GroupError::MemberNotFound { .. }));

    let err = alice.transfer_admin(group.id, "bob").await.unwrap_err();
    assert!(matches!(err, GroupError::Validation(_)));

    let err = alice.delete_event(group.id, 12345).await.unwrap_err();
    assert!(matches!(err, GroupError::EventNotFound { .. }));

    let err = alice.remove_member(group.id, "zed").await.unwrap_err();
    assert!(matches!(
        err,
        GroupError::TransientNetwork {
            applied_locally: false,
            ..
        }
    ));

    assert_eq!(alice.view(), before);
    assert_eq!(
        alice.get_group(group.id).await.unwrap().status_of("bob"),
        Some(MemberStatus::Declined)
    );
}

#[tokio::test]
async fn test_offline_mutation_without_optimistic_updates() {
    let h = Harness::new();
    let config = GroupsConfig {
        optimistic_updates: false,
        ..Default::default()
    };
    let alice = h.sign_in_with("alice", config).await;
    let group = alice
        .create_group("Running", "", vec![invite("bob")], false)
        .await
        .unwrap();
    wait_for_group(&alice, group.id).await;

    h.store.set_online(false);
    let err = alice
        .promote_member_to_admin(group.id, "bob")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GroupError::TransientNetwork {
            applied_locally: false,
            ..
        }
    ));
    let cached = alice.get_group(group.id).await.unwrap();
    assert_eq!(cached.member("bob").unwrap().role, MemberRole::Member);
}

#[tokio::test]
async fn test_not_found_errors_never_patch_the_cache() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    let group = alice
        .create_group("Running", "", vec![invite("bob")], false)
        .await
        .unwrap();
    wait_for_group(&alice, group.id).await;
    let before = alice.view();

    let err = alice
        .update_member_status(group.id, "nobody", MemberStatus::Blocked)
        .await
        .unwrap_err();
    assert!(matches!(err, GroupError::MemberNotFound { .. }));
    assert_eq!(alice.view(), before);
}

#[tokio::test]
async fn test_member_leaving_notifies_remaining_members() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    let bob = h.sign_in("bob").await;

    let group = alice
        .create_group("Band", "", vec![accepted("bob"), accepted("carol")], false)
        .await
        .unwrap();
    wait_for_group(&bob, group.id).await;
    h.outbox.drain();

    bob.delete_group_for_user(group.id).await.unwrap();
    wait_until(&bob, |view| view.group(group.id).is_none()).await;
    wait_until(&alice, |view| {
        view.group(group.id).is_some_and(|g| !g.has_member("bob"))
    })
    .await;

    let sent = h.outbox.drain();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body(), "BOB left Band");
    let mut recipients = sent[0].recipients().to_vec();
    recipients.sort();
    assert_eq!(recipients, vec!["alice".to_string(), "carol".to_string()]);
}

#[tokio::test]
async fn test_admin_deletes_group_for_everyone() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    let bob = h.sign_in("bob").await;

    let group = alice
        .create_group("Band", "", vec![accepted("bob")], false)
        .await
        .unwrap();
    wait_for_group(&bob, group.id).await;

    assert!(matches!(
        alice.remove_member(group.id, "alice").await,
        Err(GroupError::Validation(_))
    ));

    alice.delete_group_for_user(group.id).await.unwrap();
    wait_until(&bob, |view| view.groups.is_empty()).await;
}

#[tokio::test]
async fn test_transfer_admin_then_old_admin_can_leave() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    let bob = h.sign_in("bob").await;

    let group = alice
        .create_group("Band", "", vec![accepted("bob")], false)
        .await
        .unwrap();
    wait_for_group(&bob, group.id).await;

    let transferred = alice.transfer_admin(group.id, "bob").await.unwrap();
    assert_eq!(transferred.admin, "bob");
    wait_until(&alice, |view| {
        view.group(group.id).is_some_and(|g| g.admin == "bob")
    })
    .await;

    assert!(alice.remove_member(group.id, "alice").await.unwrap());
    wait_until(&alice, |view| view.group(group.id).is_none()).await;
}

#[tokio::test]
async fn test_delete_account_cleans_up() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    let bob = h.sign_in("bob").await;

    let owned = alice
        .create_group("Mine", "", vec![accepted("bob")], false)
        .await
        .unwrap();
    let joined = bob
        .create_group("Bob's", "", vec![accepted("alice")], false)
        .await
        .unwrap();
    wait_for_group(&alice, joined.id).await;

    alice.delete_account().await.unwrap();

    wait_until(&bob, |view| {
        view.group(owned.id).is_none()
            && view
                .group(joined.id)
                .is_some_and(|g| !g.has_member("alice"))
    })
    .await;
}

#[tokio::test]
async fn test_manager_switches_users() {
    let h = Harness::new();
    let mut manager = SessionManager::new(
        h.store.clone(),
        h.outbox.clone(),
        GroupsConfig::default(),
    );

    let group_id = {
        let alice = manager
            .sign_in(SessionUser::new("alice", "Alice"))
            .await
            .unwrap();
        let group = alice.create_group("Alice's", "", vec![], false).await.unwrap();
        wait_for_group(alice, group.id).await;
        group.id
    };

    // Signing in again as the same user keeps the live session
    let again = manager
        .sign_in(SessionUser::new("alice", "Alice"))
        .await
        .unwrap();
    assert!(again.groups().iter().any(|g| g.id == group_id));

    let bob = manager
        .sign_in(SessionUser::new("bob", "Bob"))
        .await
        .unwrap();
    assert_eq!(bob.user().id, "bob");
    wait_until(bob, |view| view.user_id.as_deref() == Some("bob") && !view.loading).await;
    assert!(bob.groups().is_empty());

    manager.sign_out();
    assert!(manager.session().is_none());
}

#[tokio::test]
async fn test_refresh_rebuilds_from_backend() {
    let h = Harness::new();
    let alice = h.sign_in("alice").await;
    let group = alice
        .create_group("Chess", "", vec![], false)
        .await
        .unwrap();

    let groups = alice.refresh().await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].id, group.id);
    assert!(alice.get_group(group.id).await.is_ok());
}
