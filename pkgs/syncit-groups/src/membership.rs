//! Persisted group records and the mutations applied to them
//!
//! Every mutation other than create and delete is a read-modify-write: the
//! group document is fetched, the typed group is changed through one of the
//! `apply_*` functions, and only the touched fields are written back.
//! Concurrent writers race with last-write-wins semantics. The same `apply_*`
//! functions patch the cached view when the backend cannot be reached.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use syncit_store::{DocumentStore, Fields};
use tracing::{debug, info, warn};

use crate::codec::{document_id, format_group_data, group_from_document, serialize_group, to_field};
use crate::config::GroupsConfig;
use crate::error::{GroupError, Result};
use crate::models::{
    initials_for, Event, EventId, EventType, Group, GroupId, Member, MemberRole, MemberStatus,
    UserId,
};
use crate::notifications::{Notification, Notifier};
use crate::reconcile::reconcile_documents;
use crate::visibility::stamp_new_event;

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Millisecond timestamp id, strictly increasing within the process
pub fn next_id() -> i64 {
    let now = Utc::now().timestamp_millis();
    let mut last = LAST_ID.load(Ordering::SeqCst);
    loop {
        let candidate = now.max(last + 1);
        match LAST_ID.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return candidate,
            Err(current) => last = current,
        }
    }
}

/// A group about to be created. `members` must contain the admin.
#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub description: String,
    pub admin: UserId,
    pub members: Vec<Member>,
    pub silent_notifications: bool,
}

/// A member about to be added. Missing role and status default to `member`
/// and `pending`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemberInvite {
    pub id: UserId,
    pub name: String,
    pub initials: String,
    pub phone: String,
    pub role: Option<MemberRole>,
    pub status: Option<MemberStatus>,
}

impl MemberInvite {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn into_member(self) -> Member {
        let initials = if self.initials.is_empty() {
            initials_for(&self.name)
        } else {
            self.initials
        };
        Member {
            id: self.id,
            name: self.name,
            initials,
            phone: self.phone,
            role: self.role.unwrap_or_default(),
            joined_at: Utc::now(),
            is_online: false,
            status: self.status.unwrap_or(MemberStatus::Pending),
        }
    }
}

/// An event about to be added to a group
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub date: NaiveDate,
    pub time: Option<String>,
    pub notes: String,
    pub event_type: EventType,
    pub created_by: UserId,
    /// Creator's display name
    pub user: String,
    pub user_initials: String,
}

/// Fields to overwrite on a group; `None` leaves the field alone
#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub admin: Option<UserId>,
    pub members: Option<Vec<Member>>,
    pub events: Option<Vec<Event>>,
    pub silent_notifications: Option<bool>,
    pub creator_blocked: Option<bool>,
}

impl GroupUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.admin.is_none()
            && self.members.is_none()
            && self.events.is_none()
            && self.silent_notifications.is_none()
            && self.creator_blocked.is_none()
    }

    /// Reject empty names and admins without touching the backend
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(GroupError::Validation("group name cannot be empty".into()));
            }
        }
        if let Some(admin) = &self.admin {
            if admin.is_empty() {
                return Err(GroupError::Validation("admin cannot be empty".into()));
            }
        }
        Ok(())
    }

    fn to_fields(&self) -> Result<Fields> {
        let mut fields = Fields::new();
        if let Some(name) = &self.name {
            fields.insert("name".into(), to_field(name.trim())?);
        }
        if let Some(description) = &self.description {
            fields.insert("description".into(), to_field(description)?);
        }
        if let Some(admin) = &self.admin {
            fields.insert("admin".into(), to_field(admin)?);
        }
        if let Some(members) = &self.members {
            fields.insert("members".into(), to_field(members)?);
        }
        if let Some(events) = &self.events {
            fields.insert("events".into(), to_field(events)?);
        }
        if let Some(silent) = self.silent_notifications {
            fields.insert("silentNotifications".into(), to_field(&silent)?);
        }
        if let Some(blocked) = self.creator_blocked {
            fields.insert("creatorBlocked".into(), to_field(&blocked)?);
        }
        Ok(fields)
    }
}

pub fn apply_update(group: &mut Group, update: &GroupUpdate) {
    if let Some(name) = &update.name {
        group.name = name.trim().to_string();
    }
    if let Some(description) = &update.description {
        group.description = description.clone();
    }
    if let Some(admin) = &update.admin {
        group.admin = admin.clone();
    }
    if let Some(members) = &update.members {
        group.members = members.clone();
    }
    if let Some(events) = &update.events {
        group.events = events.clone();
    }
    if let Some(silent) = update.silent_notifications {
        group.silent_notifications = silent;
    }
    if let Some(blocked) = update.creator_blocked {
        group.creator_blocked = blocked;
    }
}

/// Filter `member_id` out of the member list. Returns whether it was present.
pub fn apply_member_removal(group: &mut Group, member_id: &str) -> bool {
    let before = group.members.len();
    group.members.retain(|m| m.id != member_id);
    group.members.len() != before
}

pub fn apply_member_status(
    group: &mut Group,
    member_id: &str,
    status: MemberStatus,
) -> Result<Member> {
    let group_id = group.id;
    let member = group
        .member_mut(member_id)
        .ok_or_else(|| GroupError::MemberNotFound {
            group_id,
            member_id: member_id.to_string(),
        })?;

    if !member.status.can_transition_to(status) {
        return Err(GroupError::Validation(format!(
            "cannot change status from {} to {}",
            member.status.as_str(),
            status.as_str()
        )));
    }
    member.status = status;
    Ok(member.clone())
}

/// Give `member_id` the admin role. The group's admin pointer is untouched.
pub fn apply_promotion(group: &mut Group, member_id: &str) -> Result<Member> {
    let group_id = group.id;
    let member = group
        .member_mut(member_id)
        .ok_or_else(|| GroupError::MemberNotFound {
            group_id,
            member_id: member_id.to_string(),
        })?;
    member.role = MemberRole::Admin;
    Ok(member.clone())
}

/// Move the admin pointer to `new_admin` and give them the admin role. The
/// previous holder keeps whatever role they had.
pub fn apply_admin_transfer(group: &mut Group, new_admin: &str) -> Result<()> {
    let group_id = group.id;
    let member = group
        .member_mut(new_admin)
        .ok_or_else(|| GroupError::MemberNotFound {
            group_id,
            member_id: new_admin.to_string(),
        })?;
    if member.status != MemberStatus::Accepted {
        return Err(GroupError::Validation(
            "only accepted members can become admin".into(),
        ));
    }
    member.role = MemberRole::Admin;
    group.admin = new_admin.to_string();
    Ok(())
}

/// A stamped event for `group`, not yet attached to it
pub fn build_event(group: &Group, new_event: NewEvent) -> Event {
    let mut event = Event {
        id: next_id(),
        date: new_event.date,
        time: new_event.time,
        notes: new_event.notes,
        event_type: new_event.event_type,
        user: new_event.user,
        user_initials: new_event.user_initials,
        created_by: new_event.created_by,
        created_at: None,
        is_new_for_user: Default::default(),
    };
    let creator = event.created_by.clone();
    stamp_new_event(&mut event, &group.members, &creator);
    event
}

pub fn apply_event_removal(group: &mut Group, event_id: EventId) -> Result<Event> {
    let position = group
        .events
        .iter()
        .position(|e| e.id == event_id)
        .ok_or(GroupError::EventNotFound {
            group_id: group.id,
            event_id,
        })?;
    Ok(group.events.remove(position))
}

/// Group records in the backend collection
pub struct MembershipStore {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    collection: String,
}

impl MembershipStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        config: &GroupsConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            collection: config.collection.clone(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Deliver a notification, logging instead of failing
    pub async fn notify(&self, notification: Notification) {
        if notification.recipients().is_empty() {
            return;
        }
        let kind = notification.title();
        if let Err(e) = self.notifier.deliver(notification).await {
            warn!("Failed to deliver notification '{}': {}", kind, e);
        }
    }

    pub async fn create_group(&self, new_group: NewGroup) -> Result<Group> {
        let name = new_group.name.trim().to_string();
        if name.is_empty() {
            return Err(GroupError::Validation("group name cannot be empty".into()));
        }
        if new_group.admin.is_empty() {
            return Err(GroupError::Validation("group admin is required".into()));
        }
        match new_group.members.iter().find(|m| m.id == new_group.admin) {
            Some(admin) if admin.status == MemberStatus::Accepted => {}
            _ => {
                return Err(GroupError::Validation(
                    "admin must be an accepted member of the group".into(),
                ))
            }
        }
        {
            let mut seen = HashSet::new();
            if let Some(dup) = new_group.members.iter().find(|m| !seen.insert(m.id.as_str())) {
                return Err(GroupError::Validation(format!(
                    "member {} listed more than once",
                    dup.id
                )));
            }
        }

        let group = Group {
            id: next_id(),
            name,
            description: new_group.description,
            admin: new_group.admin,
            members: new_group.members,
            events: Vec::new(),
            created_at: Utc::now(),
            silent_notifications: new_group.silent_notifications,
            creator_blocked: false,
        };

        self.store
            .create(&self.collection, &document_id(group.id), serialize_group(&group)?)
            .await?;
        info!("Created group {} '{}'", group.id, group.name);

        let invited: Vec<UserId> = group
            .members
            .iter()
            .filter(|m| m.id != group.admin && m.status == MemberStatus::Pending)
            .map(|m| m.id.clone())
            .collect();
        self.notify(Notification::GroupInvite {
            group_id: group.id,
            group_name: group.name.clone(),
            sender_name: admin_name(&group),
            recipients: invited,
        })
        .await;

        Ok(group)
    }

    pub async fn get_group(&self, group_id: GroupId) -> Result<Group> {
        let document = self
            .store
            .get(&self.collection, &document_id(group_id))
            .await?
            .ok_or(GroupError::GroupNotFound(group_id))?;
        format_group_data(&document.id, &document.data)
    }

    /// Every readable group in the collection
    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        let documents = self.store.list(&self.collection).await?;
        Ok(documents
            .iter()
            .filter_map(|doc| match group_from_document(doc) {
                Ok(group) => Some(group),
                Err(e) => {
                    warn!("Skipping group document {}: {}", doc.id, e);
                    None
                }
            })
            .collect())
    }

    /// One-off rebuild of the groups visible to `user_id`
    pub async fn list_user_groups(&self, user_id: &str) -> Result<Vec<Group>> {
        let documents = self.store.list(&self.collection).await?;
        Ok(reconcile_documents(&documents, user_id))
    }

    pub async fn update_group(&self, group_id: GroupId, update: GroupUpdate) -> Result<Group> {
        update.validate()?;
        let mut group = self.get_group(group_id).await?;
        if update.is_empty() {
            return Ok(group);
        }

        self.write_fields(group_id, update.to_fields()?).await?;
        apply_update(&mut group, &update);
        debug!("Updated group {}", group_id);
        Ok(group)
    }

    pub async fn delete_group(&self, group_id: GroupId) -> Result<()> {
        self.store
            .delete(&self.collection, &document_id(group_id))
            .await?;
        info!("Deleted group {}", group_id);
        Ok(())
    }

    /// Append a member. Ids already present are not deduplicated.
    pub async fn add_member_to_group(
        &self,
        group_id: GroupId,
        invite: MemberInvite,
    ) -> Result<Member> {
        if invite.id.is_empty() {
            return Err(GroupError::Validation("member id is required".into()));
        }
        let mut group = self.get_group(group_id).await?;
        let member = invite.into_member();
        group.members.push(member.clone());
        self.write_field(group_id, "members", &group.members).await?;
        debug!("Added {} to group {}", member.id, group_id);

        if member.status == MemberStatus::Pending {
            self.notify(Notification::GroupInvite {
                group_id,
                group_name: group.name.clone(),
                sender_name: admin_name(&group),
                recipients: vec![member.id.clone()],
            })
            .await;
        }
        Ok(member)
    }

    /// Filter a member out of the group. Unknown member ids leave the group
    /// unchanged and report `false`.
    pub async fn remove_member_from_group(
        &self,
        group_id: GroupId,
        member_id: &str,
    ) -> Result<bool> {
        let mut group = self.get_group(group_id).await?;
        if !apply_member_removal(&mut group, member_id) {
            debug!("Member {} not in group {}, nothing to remove", member_id, group_id);
            return Ok(false);
        }
        self.write_field(group_id, "members", &group.members).await?;
        debug!("Removed {} from group {}", member_id, group_id);
        Ok(true)
    }

    pub async fn update_member_status(
        &self,
        group_id: GroupId,
        member_id: &str,
        status: MemberStatus,
    ) -> Result<Member> {
        let mut group = self.get_group(group_id).await?;
        let member = apply_member_status(&mut group, member_id, status)?;
        self.write_field(group_id, "members", &group.members).await?;
        debug!(
            "Member {} of group {} is now {}",
            member_id,
            group_id,
            status.as_str()
        );
        Ok(member)
    }

    pub async fn promote_member_to_admin(
        &self,
        group_id: GroupId,
        member_id: &str,
    ) -> Result<Member> {
        let mut group = self.get_group(group_id).await?;
        let member = apply_promotion(&mut group, member_id)?;
        self.write_field(group_id, "members", &group.members).await?;
        info!("Promoted {} to admin role in group {}", member_id, group_id);
        Ok(member)
    }

    pub async fn transfer_admin(&self, group_id: GroupId, new_admin: &str) -> Result<Group> {
        let mut group = self.get_group(group_id).await?;
        apply_admin_transfer(&mut group, new_admin)?;

        let mut fields = Fields::new();
        fields.insert("admin".into(), to_field(&group.admin)?);
        fields.insert("members".into(), to_field(&group.members)?);
        self.write_fields(group_id, fields).await?;

        let divergent = group.admin_divergence();
        if !divergent.is_empty() {
            debug!(
                "Group {} has members whose role disagrees with the admin pointer: {:?}",
                group_id, divergent
            );
        }
        info!("Transferred group {} to {}", group_id, new_admin);
        Ok(group)
    }

    pub async fn add_event(&self, group_id: GroupId, new_event: NewEvent) -> Result<Event> {
        let mut group = self.get_group(group_id).await?;
        let event = build_event(&group, new_event);
        group.events.push(event.clone());
        self.write_field(group_id, "events", &group.events).await?;
        debug!("Added event {} to group {}", event.id, group_id);

        if !group.silent_notifications {
            let recipients = group
                .accepted_member_ids()
                .filter(|id| *id != event.created_by)
                .map(str::to_string)
                .collect();
            self.notify(Notification::EventAdded {
                group_id,
                group_name: group.name.clone(),
                event_id: event.id,
                notes: event.notes.clone(),
                date: event.date,
                recipients,
            })
            .await;
        }
        Ok(event)
    }

    pub async fn remove_event(&self, group_id: GroupId, event_id: EventId) -> Result<Event> {
        let mut group = self.get_group(group_id).await?;
        let event = apply_event_removal(&mut group, event_id)?;
        self.write_field(group_id, "events", &group.events).await?;
        debug!("Removed event {} from group {}", event_id, group_id);
        Ok(event)
    }

    pub async fn block_group_creator(&self, group_id: GroupId) -> Result<()> {
        // Fetch first so a missing group is reported rather than recreated
        self.get_group(group_id).await?;
        self.write_field(group_id, "creatorBlocked", &true).await?;
        info!("Blocked creator of group {}", group_id);
        Ok(())
    }

    /// Delete every group whose admin pointer is `user_id`
    pub async fn delete_groups_administered_by(&self, user_id: &str) -> Result<Vec<GroupId>> {
        let owned: Vec<GroupId> = self
            .list_groups()
            .await?
            .into_iter()
            .filter(|g| g.admin == user_id)
            .map(|g| g.id)
            .collect();

        for group_id in &owned {
            self.delete_group(*group_id).await?;
        }
        info!("Deleted {} groups administered by {}", owned.len(), user_id);
        Ok(owned)
    }

    async fn write_field<T: Serialize + ?Sized>(
        &self,
        group_id: GroupId,
        field: &str,
        value: &T,
    ) -> Result<()> {
        let mut fields = Fields::new();
        fields.insert(field.to_string(), to_field(value)?);
        self.write_fields(group_id, fields).await
    }

    /// A group deleted since it was read is reported as not found
    async fn write_fields(&self, group_id: GroupId, fields: Fields) -> Result<()> {
        self.store
            .update(&self.collection, &document_id(group_id), fields)
            .await
            .map_err(|e| GroupError::from_group_write(e, group_id))
    }
}

fn admin_name(group: &Group) -> String {
    group
        .member(&group.admin)
        .map(|m| m.name.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase() {
        let ids: Vec<i64> = (0..100).map(|_| next_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_invite_defaults() {
        let member = MemberInvite::new("bob", "Bob Stone").into_member();
        assert_eq!(member.status, MemberStatus::Pending);
        assert_eq!(member.role, MemberRole::Member);
        assert_eq!(member.initials, "BS");
    }

    #[test]
    fn test_transfer_keeps_previous_role() {
        let mut group = Group {
            id: 1,
            admin: "a".into(),
            members: vec![
                Member {
                    id: "a".into(),
                    role: MemberRole::Admin,
                    ..Default::default()
                },
                Member {
                    id: "b".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        apply_admin_transfer(&mut group, "b").unwrap();
        assert_eq!(group.admin, "b");
        assert_eq!(group.member("b").unwrap().role, MemberRole::Admin);
        assert_eq!(group.member("a").unwrap().role, MemberRole::Admin);
        assert_eq!(group.admin_divergence(), vec!["a".to_string()]);
    }

    #[test]
    fn test_transfer_requires_accepted_member() {
        let mut group = Group {
            id: 1,
            admin: "a".into(),
            members: vec![Member {
                id: "b".into(),
                status: MemberStatus::Pending,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            apply_admin_transfer(&mut group, "b"),
            Err(GroupError::Validation(_))
        ));
        assert!(matches!(
            apply_admin_transfer(&mut group, "z"),
            Err(GroupError::MemberNotFound { .. })
        ));
        assert_eq!(group.admin, "a");
    }

    #[test]
    fn test_update_fields_only_carry_supplied_values() {
        let update = GroupUpdate {
            name: Some("  Trimmed ".into()),
            silent_notifications: Some(true),
            ..Default::default()
        };
        let fields = update.to_fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["name"], "Trimmed");
        assert_eq!(fields["silentNotifications"], true);

        let blank = GroupUpdate {
            name: Some(" ".into()),
            ..Default::default()
        };
        assert!(matches!(blank.validate(), Err(GroupError::Validation(_))));
    }
}
