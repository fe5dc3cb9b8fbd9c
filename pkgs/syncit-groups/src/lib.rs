//! SynciT Groups - group membership and event visibility
//!
//! This crate keeps a signed-in user's view of their groups in step with a
//! shared document collection, and applies membership and event changes to
//! that collection.
//!
//! # Architecture
//!
//! - **MembershipStore**: create, read, update and delete group records and
//!   their embedded members and events
//! - **visibility**: per-user "new event" flags
//! - **ReconciliationListener**: rebuilds the visible groups from every
//!   snapshot of the collection into a shared **GroupCache**
//! - **GroupSession**: one signed-in user; permission checks and the
//!   optimistic fallback when the backend is unreachable
//! - **SessionManager**: at most one session at a time
//! - **UserDirectory**: profiles and phone-number lookup
//! - **Notifier**: best-effort delivery of invitations and event notices
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use syncit_groups::{GroupsConfig, MemberInvite, SessionManager, SessionUser, TracingNotifier};
//! use syncit_store::MemoryDocumentStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sessions = SessionManager::new(
//!     Arc::new(MemoryDocumentStore::new()),
//!     Arc::new(TracingNotifier),
//!     GroupsConfig::default(),
//! );
//!
//! let session = sessions.sign_in(SessionUser::new("alice", "Alice Smith")).await?;
//! let group = session
//!     .create_group("Climbing", "Tuesdays", vec![MemberInvite::new("bob", "Bob")], false)
//!     .await?;
//! println!("created {}", group.id);
//!
//! sessions.sign_out();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod listener;
pub mod membership;
pub mod models;
pub mod notifications;
pub mod reconcile;
pub mod session;
pub mod visibility;

pub use cache::{GroupCache, VisibleGroups};
pub use codec::{format_group_data, serialize_group};
pub use config::GroupsConfig;
pub use directory::{normalize_phone_number, ContactUser, UserDirectory, UserProfile};
pub use error::{GroupError, Result};
pub use listener::{ListenerState, ReconciliationListener};
pub use membership::{GroupUpdate, MemberInvite, MembershipStore, NewEvent, NewGroup};
pub use models::{
    Event, EventId, EventType, Group, GroupId, Member, MemberRole, MemberStatus, UserId,
};
pub use notifications::{Notification, Notifier, OutboxNotifier, TracingNotifier};
pub use reconcile::{reconcile, GroupsDiff};
pub use session::{EventDraft, GroupSession, SessionManager, SessionUser};
pub use visibility::{count_new_events, has_new_events, is_event_new_for_user};
