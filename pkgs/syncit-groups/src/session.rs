//! Signed-in group service
//!
//! A [`GroupSession`] exists for exactly one user between sign-in and
//! sign-out. It owns the reconciliation listener and the cached view, and
//! checks permissions before any mutation reaches the backend.
//!
//! When the backend is unreachable and optimistic updates are enabled, the
//! mutation is applied to the cached view instead and the caller receives
//! `GroupError::TransientNetwork { applied_locally: true, .. }`. The patch
//! lasts until the next snapshot from the backend replaces it.

use std::sync::Arc;
use syncit_store::DocumentStore;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{GroupCache, VisibleGroups};
use crate::config::GroupsConfig;
use crate::directory::UserDirectory;
use crate::error::{GroupError, Result};
use crate::listener::{ListenerState, ReconciliationListener};
use crate::membership::{
    apply_admin_transfer, apply_event_removal, apply_member_removal, apply_member_status,
    apply_promotion, apply_update, build_event, GroupUpdate, MemberInvite, MembershipStore,
    NewEvent, NewGroup,
};
use crate::models::{
    initials_for, Event, EventId, EventType, Group, GroupId, Member, MemberRole, MemberStatus,
    UserId,
};
use crate::notifications::{Notification, Notifier};
use crate::visibility::{has_new_events, is_event_new_for_user, mark_viewed};

/// The signed-in user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUser {
    pub id: UserId,
    pub name: String,
    pub phone: String,
}

impl SessionUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: String::new(),
        }
    }

    pub fn initials(&self) -> String {
        initials_for(&self.name)
    }
}

/// What the current user supplies when adding an event
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub date: chrono::NaiveDate,
    pub time: Option<String>,
    pub notes: String,
    pub event_type: EventType,
}

pub struct GroupSession {
    user: SessionUser,
    config: GroupsConfig,
    cache: GroupCache,
    listener: ReconciliationListener,
    membership: MembershipStore,
    directory: UserDirectory,
}

impl GroupSession {
    /// Sign `user` in and start following their groups
    pub async fn start(
        user: SessionUser,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        config: GroupsConfig,
    ) -> Result<Self> {
        if user.id.is_empty() {
            return Err(GroupError::Validation("user id is required".into()));
        }

        let cache = GroupCache::new();
        let mut listener =
            ReconciliationListener::new(store.clone(), &config.collection, cache.clone());
        listener.start(&user.id).await?;

        let membership = MembershipStore::new(store.clone(), notifier, &config);
        let directory = UserDirectory::new(store, &config.users_collection);

        info!("Session started for {}", user.id);
        Ok(Self {
            user,
            config,
            cache,
            listener,
            membership,
            directory,
        })
    }

    pub fn user(&self) -> &SessionUser {
        &self.user
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn membership(&self) -> &MembershipStore {
        &self.membership
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// Visible groups as currently cached
    pub fn groups(&self) -> Vec<Group> {
        self.cache.groups()
    }

    pub fn view(&self) -> VisibleGroups {
        self.cache.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<VisibleGroups> {
        self.cache.subscribe()
    }

    /// A visible group, from the cache or else the backend
    pub async fn get_group(&self, group_id: GroupId) -> Result<Group> {
        if let Some(group) = self.cache.group(group_id) {
            return Ok(group);
        }
        let group = self.membership.get_group(group_id).await?;
        if !crate::reconcile::is_visible_to(&group, &self.user.id) {
            return Err(GroupError::GroupNotFound(group_id));
        }
        Ok(group)
    }

    /// Rebuild the visible groups with a one-off read of the collection
    pub async fn refresh(&self) -> Result<Vec<Group>> {
        let epoch = self.cache.snapshot().epoch();
        match self.membership.list_user_groups(&self.user.id).await {
            Ok(groups) => {
                self.cache.apply_snapshot(epoch, groups.clone());
                debug!("Manual refresh found {} groups", groups.len());
                Ok(groups)
            }
            Err(e) => {
                warn!("Manual refresh failed: {}", e);
                Err(e)
            }
        }
    }

    /// Create a group administered by the current user. Invitees join as
    /// pending unless their invite says otherwise.
    pub async fn create_group(
        &self,
        name: &str,
        description: &str,
        invites: Vec<MemberInvite>,
        silent_notifications: bool,
    ) -> Result<Group> {
        let mut members = vec![Member {
            id: self.user.id.clone(),
            name: self.user.name.clone(),
            initials: self.user.initials(),
            phone: self.user.phone.clone(),
            role: MemberRole::Admin,
            status: MemberStatus::Accepted,
            ..Default::default()
        }];
        members.extend(invites.into_iter().map(MemberInvite::into_member));

        self.membership
            .create_group(NewGroup {
                name: name.to_string(),
                description: description.to_string(),
                admin: self.user.id.clone(),
                members,
                silent_notifications,
            })
            .await
    }

    pub async fn update_group(&self, group_id: GroupId, update: GroupUpdate) -> Result<Group> {
        update.validate()?;
        self.require_admin(group_id).await?;
        let result = self.membership.update_group(group_id, update.clone()).await;
        self.settle(result, group_id, |group| {
            apply_update(group, &update);
            Ok(())
        })
    }

    pub async fn add_members(
        &self,
        group_id: GroupId,
        invites: Vec<MemberInvite>,
    ) -> Result<Vec<Member>> {
        if invites.iter().any(|invite| invite.id.is_empty()) {
            return Err(GroupError::Validation("member id is required".into()));
        }
        self.require_admin(group_id).await?;

        let mut added = Vec::with_capacity(invites.len());
        for (index, invite) in invites.iter().enumerate() {
            match self
                .membership
                .add_member_to_group(group_id, invite.clone())
                .await
            {
                Ok(member) => added.push(member),
                Err(e) => {
                    let rest: Vec<Member> = invites[index..]
                        .iter()
                        .cloned()
                        .map(MemberInvite::into_member)
                        .collect();
                    let result: Result<Vec<Member>> = Err(e);
                    return self.settle(result, group_id, move |group| {
                        group.members.extend(rest);
                        Ok(())
                    });
                }
            }
        }
        Ok(added)
    }

    /// Remove a member. Admins may remove anyone but themselves; members may
    /// only remove themselves.
    pub async fn remove_member(&self, group_id: GroupId, member_id: &str) -> Result<bool> {
        let group = self.get_group(group_id).await?;
        let is_admin = group.is_admin(&self.user.id);
        if !is_admin && member_id != self.user.id {
            return Err(GroupError::PermissionDenied(
                "only the admin can remove other members".into(),
            ));
        }
        if member_id == group.admin {
            return Err(GroupError::Validation(
                "transfer the admin role before leaving the group".into(),
            ));
        }

        let result = self
            .membership
            .remove_member_from_group(group_id, member_id)
            .await;
        let removed = self.settle(result, group_id, |g| {
            if apply_member_removal(g, member_id) {
                Ok(())
            } else {
                Err(GroupError::MemberNotFound {
                    group_id,
                    member_id: member_id.to_string(),
                })
            }
        })?;

        if removed {
            let member_name = group
                .member(member_id)
                .map(|m| m.name.clone())
                .unwrap_or_default();
            let recipients = remaining_recipients(&group, &[member_id, self.user.id.as_str()]);
            let notification = if is_admin {
                Notification::MemberRemoved {
                    group_id,
                    group_name: group.name.clone(),
                    member_name,
                    removed_by: self.user.name.clone(),
                    recipients,
                }
            } else {
                Notification::MemberLeft {
                    group_id,
                    group_name: group.name.clone(),
                    member_name,
                    recipients,
                }
            };
            self.membership.notify(notification).await;
        }
        Ok(removed)
    }

    /// Change a member's invitation status. Members answer their own
    /// invitations; the admin may change anyone's.
    pub async fn update_member_status(
        &self,
        group_id: GroupId,
        member_id: &str,
        status: MemberStatus,
    ) -> Result<Member> {
        let group = self.get_group(group_id).await?;
        if member_id != self.user.id && !group.is_admin(&self.user.id) {
            return Err(GroupError::PermissionDenied(
                "only the member or the admin can change this status".into(),
            ));
        }
        let previous = group.status_of(member_id);
        apply_member_status(&mut group.clone(), member_id, status)?;

        let result = self
            .membership
            .update_member_status(group_id, member_id, status)
            .await;
        let member = self.settle(result, group_id, |g| {
            apply_member_status(g, member_id, status).map(|_| ())
        })?;

        if previous == Some(MemberStatus::Pending) && status == MemberStatus::Accepted {
            self.membership
                .notify(Notification::InviteAccepted {
                    group_id,
                    group_name: group.name.clone(),
                    member_name: member.name.clone(),
                    recipients: remaining_recipients(&group, &[member_id]),
                })
                .await;
        }
        Ok(member)
    }

    /// Give a member the admin role. The group's admin pointer does not move.
    pub async fn promote_member_to_admin(
        &self,
        group_id: GroupId,
        member_id: &str,
    ) -> Result<Member> {
        let group = self.require_admin(group_id).await?;
        apply_promotion(&mut group.clone(), member_id)?;

        let result = self
            .membership
            .promote_member_to_admin(group_id, member_id)
            .await;
        self.settle(result, group_id, |g| apply_promotion(g, member_id).map(|_| ()))
    }

    pub async fn transfer_admin(&self, group_id: GroupId, new_admin: &str) -> Result<Group> {
        let group = self.require_admin(group_id).await?;
        apply_admin_transfer(&mut group.clone(), new_admin)?;

        let result = self.membership.transfer_admin(group_id, new_admin).await;
        self.settle(result, group_id, |g| apply_admin_transfer(g, new_admin))
    }

    /// Mark the group's creator as blocked by the current (non-admin) member
    pub async fn block_group_creator(&self, group_id: GroupId) -> Result<()> {
        let group = self.get_group(group_id).await?;
        if group.is_admin(&self.user.id) {
            return Err(GroupError::PermissionDenied(
                "the admin cannot block themselves".into(),
            ));
        }
        if !group.has_member(&self.user.id) {
            return Err(GroupError::PermissionDenied(
                "not a member of this group".into(),
            ));
        }

        let result = self.membership.block_group_creator(group_id).await;
        self.settle(result, group_id, |g| {
            g.creator_blocked = true;
            Ok(())
        })
    }

    /// The admin deletes the group for everyone; a member leaves it
    pub async fn delete_group_for_user(&self, group_id: GroupId) -> Result<()> {
        let group = self.get_group(group_id).await?;

        if group.is_admin(&self.user.id) {
            let result = self.membership.delete_group(group_id).await;
            return self.settle_removal(result, group_id);
        }

        let result = self
            .membership
            .remove_member_from_group(group_id, &self.user.id)
            .await;
        let removed = match result {
            Ok(removed) => removed,
            Err(e) => return self.settle_removal(Err(e), group_id),
        };

        if removed {
            let member_name = group
                .member(&self.user.id)
                .map(|m| m.name.clone())
                .unwrap_or_else(|| self.user.name.clone());
            self.membership
                .notify(Notification::MemberLeft {
                    group_id,
                    group_name: group.name.clone(),
                    member_name,
                    recipients: remaining_recipients(&group, &[self.user.id.as_str()]),
                })
                .await;
        }
        Ok(())
    }

    /// Add an event as the current user, who must be the admin or an
    /// accepted member
    pub async fn add_event(&self, group_id: GroupId, draft: EventDraft) -> Result<Event> {
        let group = self.get_group(group_id).await?;
        if !group.is_accessible_to(&self.user.id) {
            return Err(GroupError::PermissionDenied(
                "only accepted members can add events".into(),
            ));
        }

        let new_event = NewEvent {
            date: draft.date,
            time: draft.time,
            notes: draft.notes,
            event_type: draft.event_type,
            created_by: self.user.id.clone(),
            user: self.user.name.clone(),
            user_initials: self.user.initials(),
        };

        let result = self.membership.add_event(group_id, new_event.clone()).await;
        self.settle(result, group_id, |g| {
            let event = build_event(g, new_event);
            g.events.push(event);
            Ok(())
        })
    }

    /// Delete an event. Allowed for the admin and the event's creator.
    pub async fn delete_event(&self, group_id: GroupId, event_id: EventId) -> Result<()> {
        let group = self.get_group(group_id).await?;
        let event = group.event(event_id).ok_or(GroupError::EventNotFound {
            group_id,
            event_id,
        })?;
        if !group.is_admin(&self.user.id) && event.created_by != self.user.id {
            return Err(GroupError::PermissionDenied(
                "only the admin or the event creator can delete it".into(),
            ));
        }

        let result = self
            .membership
            .remove_event(group_id, event_id)
            .await
            .map(|_| ());
        self.settle(result, group_id, |g| apply_event_removal(g, event_id).map(|_| ()))
    }

    /// Acknowledge an event for the current user. Only the cached view
    /// changes; the next snapshot from the backend restores the stored flag.
    pub fn mark_event_as_viewed(&self, group_id: GroupId, event_id: EventId) -> Result<bool> {
        let group = self
            .cache
            .group(group_id)
            .ok_or(GroupError::GroupNotFound(group_id))?;
        if group.event(event_id).is_none() {
            return Err(GroupError::EventNotFound { group_id, event_id });
        }

        let mut changed = false;
        self.cache.patch_group(group_id, |g| {
            if let Some(event) = g.event_mut(event_id) {
                changed = mark_viewed(event, &self.user.id);
            }
        });
        Ok(changed)
    }

    pub fn is_event_new(&self, event: &Event) -> bool {
        is_event_new_for_user(event, &self.user.id)
    }

    pub fn has_new_events(&self, group_id: GroupId) -> bool {
        self.cache
            .group(group_id)
            .is_some_and(|g| has_new_events(&g, &self.user.id))
    }

    /// Delete every group the user administers, leave every other visible
    /// group, then end the session.
    pub async fn delete_account(mut self) -> Result<()> {
        let deleted = self
            .membership
            .delete_groups_administered_by(&self.user.id)
            .await?;

        let others = self.membership.list_user_groups(&self.user.id).await?;
        for group in others.iter().filter(|g| !deleted.contains(&g.id)) {
            self.membership
                .remove_member_from_group(group.id, &self.user.id)
                .await?;
        }

        info!(
            "Account {} removed: {} groups deleted, {} left",
            self.user.id,
            deleted.len(),
            others.len()
        );
        self.shutdown();
        Ok(())
    }

    /// End the session and clear the cached view
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.listener.stop();
        self.cache.clear();
        info!("Session closed for {}", self.user.id);
    }

    async fn require_admin(&self, group_id: GroupId) -> Result<Group> {
        let group = self.get_group(group_id).await?;
        if !group.is_admin(&self.user.id) {
            return Err(GroupError::PermissionDenied(format!(
                "only the admin of group {} can do this",
                group_id
            )));
        }
        Ok(group)
    }

    /// Fall back to patching the cached group when the backend is unreachable.
    /// `applied_locally` is only set when the patch was accepted.
    fn settle<T>(
        &self,
        result: Result<T>,
        group_id: GroupId,
        patch: impl FnOnce(&mut Group) -> Result<()>,
    ) -> Result<T> {
        match result {
            Err(GroupError::TransientNetwork { message, .. }) if self.config.optimistic_updates => {
                let applied = match self.cache.try_patch_group(group_id, patch) {
                    Ok(applied) => applied,
                    Err(e) => {
                        debug!("Cached group {} rejected local change: {}", group_id, e);
                        false
                    }
                };
                if applied {
                    warn!(
                        "Backend unreachable, applied change to group {} locally: {}",
                        group_id, message
                    );
                }
                Err(GroupError::TransientNetwork {
                    message,
                    applied_locally: applied,
                })
            }
            other => other,
        }
    }

    fn settle_removal(&self, result: Result<()>, group_id: GroupId) -> Result<()> {
        match result {
            Err(GroupError::TransientNetwork { message, .. }) if self.config.optimistic_updates => {
                let applied = self.cache.remove_group(group_id);
                if applied {
                    warn!(
                        "Backend unreachable, removed group {} locally: {}",
                        group_id, message
                    );
                }
                Err(GroupError::TransientNetwork {
                    message,
                    applied_locally: applied,
                })
            }
            other => other,
        }
    }
}

/// Accepted members of `group` other than `excluded`
fn remaining_recipients(group: &Group, excluded: &[&str]) -> Vec<UserId> {
    group
        .accepted_member_ids()
        .filter(|id| !excluded.contains(id))
        .map(str::to_string)
        .collect()
}

/// Keeps at most one session alive, switching users by tearing down the
/// previous session first
pub struct SessionManager {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    config: GroupsConfig,
    current: Option<GroupSession>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        config: GroupsConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
            current: None,
        }
    }

    pub async fn sign_in(&mut self, user: SessionUser) -> Result<&GroupSession> {
        let same = self
            .current
            .as_ref()
            .is_some_and(|session| session.user().id == user.id);

        if !same {
            self.sign_out();
            let session = GroupSession::start(
                user,
                self.store.clone(),
                self.notifier.clone(),
                self.config.clone(),
            )
            .await?;
            self.current = Some(session);
        }

        self.current
            .as_ref()
            .ok_or_else(|| GroupError::Storage("session was not started".into()))
    }

    pub fn sign_out(&mut self) {
        if let Some(session) = self.current.take() {
            session.close();
        }
    }

    pub fn session(&self) -> Option<&GroupSession> {
        self.current.as_ref()
    }
}
