//! Rebuilding a user's visible groups from a full collection snapshot
//!
//! Every notification triggers a complete rescan of the collection, so the
//! cost is proportional to the number of groups in the system, not the
//! number the user belongs to. A group is visible when the user holds the
//! admin pointer or appears anywhere in the member list, whatever their
//! status: pending and declined invitations stay visible so they can be
//! answered or shown as declined.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use syncit_store::{CollectionSnapshot, Document};
use tracing::{debug, warn};

use crate::codec::group_from_document;
use crate::models::{Group, GroupId};

pub fn is_visible_to(group: &Group, user_id: &str) -> bool {
    group.admin == user_id || group.has_member(user_id)
}

/// Same test as [`is_visible_to`] on a raw document, so unrelated documents
/// are never decoded
fn document_visible_to(document: &Document, user_id: &str) -> bool {
    if document.data.get("admin").and_then(Value::as_str) == Some(user_id) {
        return true;
    }

    document
        .data
        .get("members")
        .and_then(Value::as_array)
        .is_some_and(|members| {
            members
                .iter()
                .any(|m| m.get("id").and_then(Value::as_str) == Some(user_id))
        })
}

/// Every group in `documents` visible to `user_id`, in document order.
/// Documents that fail to decode are skipped.
pub fn reconcile_documents<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    user_id: &str,
) -> Vec<Group> {
    let mut groups = Vec::new();

    for document in documents {
        if !document_visible_to(document, user_id) {
            continue;
        }
        match group_from_document(document) {
            Ok(group) => groups.push(group),
            Err(e) => warn!("Skipping group document {}: {}", document.id, e),
        }
    }

    groups
}

pub fn reconcile(snapshot: &CollectionSnapshot, user_id: &str) -> Vec<Group> {
    let groups = reconcile_documents(&snapshot.documents, user_id);
    debug!(
        "Reconciled {} of {} groups for user {}",
        groups.len(),
        snapshot.len(),
        user_id
    );
    groups
}

/// Which groups appeared, disappeared or changed between two rebuilds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupsDiff {
    pub added: Vec<GroupId>,
    pub removed: Vec<GroupId>,
    pub changed: Vec<GroupId>,
}

impl GroupsDiff {
    pub fn between(previous: &[Group], next: &[Group]) -> Self {
        let before: HashMap<GroupId, &Group> = previous.iter().map(|g| (g.id, g)).collect();
        let mut diff = GroupsDiff::default();

        for group in next {
            match before.get(&group.id) {
                None => diff.added.push(group.id),
                Some(old) if *old != group => diff.changed.push(group.id),
                Some(_) => {}
            }
        }

        let after: HashSet<GroupId> = next.iter().map(|g| g.id).collect();
        diff.removed = previous
            .iter()
            .filter(|g| !after.contains(&g.id))
            .map(|g| g.id)
            .collect();

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::serialize_group;
    use crate::models::{Member, MemberStatus};
    use chrono::{TimeZone, Utc};

    fn group(id: GroupId, admin: &str, members: &[(&str, MemberStatus)]) -> Group {
        Group {
            id,
            name: format!("group {}", id),
            admin: admin.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            members: members
                .iter()
                .map(|(member_id, status)| Member {
                    id: member_id.to_string(),
                    status: *status,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn snapshot(groups: &[Group]) -> CollectionSnapshot {
        CollectionSnapshot {
            collection: "groups".into(),
            documents: groups
                .iter()
                .map(|g| Document::new(g.id.to_string(), serialize_group(g).unwrap()))
                .collect(),
        }
    }

    #[test]
    fn test_visible_iff_admin_or_listed_member() {
        use MemberStatus::*;
        let groups = [
            group(1, "a", &[("a", Accepted)]),
            group(2, "x", &[("x", Accepted), ("a", Pending)]),
            group(3, "x", &[("x", Accepted), ("a", Declined)]),
            group(4, "x", &[("x", Accepted), ("a", Blocked)]),
            group(5, "x", &[("x", Accepted), ("b", Accepted)]),
            // admin pointer without a member entry
            group(6, "a", &[]),
        ];
        let snap = snapshot(&groups);

        let ids: Vec<GroupId> = reconcile(&snap, "a").iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 6]);

        for g in &groups {
            assert_eq!(
                is_visible_to(g, "a"),
                ids.contains(&g.id),
                "group {} visibility mismatch",
                g.id
            );
        }
    }

    #[test]
    fn test_malformed_documents_are_skipped() {
        let mut snap = snapshot(&[group(1, "a", &[])]);
        let bad = serde_json::json!({ "admin": "a", "members": "oops" });
        snap.documents
            .push(Document::new("2", bad.as_object().cloned().unwrap()));
        snap.documents.push(Document::new(
            "not-a-number",
            serialize_group(&group(3, "a", &[])).unwrap(),
        ));

        let groups = reconcile(&snap, "a");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, 1);
    }

    #[test]
    fn test_diff_between_rebuilds() {
        let before = vec![group(1, "a", &[]), group(2, "a", &[]), group(3, "a", &[])];
        let mut renamed = group(2, "a", &[]);
        renamed.name = "renamed".into();
        let after = vec![group(1, "a", &[]), renamed, group(4, "a", &[])];

        let diff = GroupsDiff::between(&before, &after);
        assert_eq!(diff.added, vec![4]);
        assert_eq!(diff.removed, vec![3]);
        assert_eq!(diff.changed, vec![2]);
        assert!(GroupsDiff::between(&after, &after).is_empty());
    }
}
