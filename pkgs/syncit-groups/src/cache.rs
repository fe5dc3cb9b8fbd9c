//! The shared view of the current user's visible groups

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::Result;
use crate::models::{Group, GroupId, UserId};
use crate::reconcile::GroupsDiff;

/// Everything the host shows about the current user's groups
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleGroups {
    pub user_id: Option<UserId>,
    pub groups: Vec<Group>,
    /// Set from sign-in until the first snapshot arrives
    pub loading: bool,
    /// Bumped on every change to this value
    pub revision: u64,
    /// Difference introduced by the latest backend rebuild
    pub last_diff: GroupsDiff,
    /// Last change feed failure, cleared by the next good snapshot
    pub last_error: Option<String>,
    epoch: u64,
}

impl VisibleGroups {
    pub fn group(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == group_id)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Cloneable handle over the single visible-groups value.
///
/// Wholesale replacement only comes from a reconciled snapshot, and only for
/// the epoch handed out by the latest [`GroupCache::begin`]. Everything else
/// patches the current value in place.
#[derive(Debug, Clone)]
pub struct GroupCache {
    sender: Arc<watch::Sender<VisibleGroups>>,
}

impl Default for GroupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupCache {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(VisibleGroups::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Start a new generation for `user_id`, discarding the previous view.
    pub fn begin(&self, user_id: &str) -> u64 {
        let mut epoch = 0;
        self.sender.send_modify(|view| {
            epoch = view.epoch + 1;
            *view = VisibleGroups {
                user_id: Some(user_id.to_string()),
                loading: true,
                revision: view.revision + 1,
                epoch,
                ..Default::default()
            };
        });
        debug!("Group cache epoch {} started for {}", epoch, user_id);
        epoch
    }

    /// Replace the groups with a fresh rebuild. Ignored when `epoch` is stale.
    pub fn apply_snapshot(&self, epoch: u64, groups: Vec<Group>) -> bool {
        self.sender.send_if_modified(|view| {
            if view.epoch != epoch {
                return false;
            }
            let diff = GroupsDiff::between(&view.groups, &groups);
            let modified = view.loading || view.last_error.is_some() || !diff.is_empty();
            if modified {
                view.groups = groups;
                view.last_diff = diff;
                view.loading = false;
                view.last_error = None;
                view.revision += 1;
            }
            modified
        })
    }

    /// Record a feed failure for `epoch` and stop showing the loading state.
    pub fn record_error(&self, epoch: u64, message: String) {
        self.sender.send_if_modified(|view| {
            if view.epoch != epoch {
                return false;
            }
            view.loading = false;
            view.last_error = Some(message);
            view.revision += 1;
            true
        });
    }

    /// Apply `patch` to a cached group. Returns false when it is not cached.
    pub fn patch_group(&self, group_id: GroupId, patch: impl FnOnce(&mut Group)) -> bool {
        self.sender.send_if_modified(|view| {
            let Some(group) = view.groups.iter_mut().find(|g| g.id == group_id) else {
                return false;
            };
            patch(group);
            view.revision += 1;
            true
        })
    }

    /// Apply a fallible `patch` to a copy of a cached group and keep the copy
    /// only when the patch succeeds. Returns `Ok(false)` when the group is not
    /// cached; a rejected patch leaves the view untouched.
    pub fn try_patch_group(
        &self,
        group_id: GroupId,
        patch: impl FnOnce(&mut Group) -> Result<()>,
    ) -> Result<bool> {
        let mut outcome = Ok(false);
        self.sender.send_if_modified(|view| {
            let Some(group) = view.groups.iter_mut().find(|g| g.id == group_id) else {
                return false;
            };
            let mut patched = group.clone();
            if let Err(e) = patch(&mut patched) {
                outcome = Err(e);
                return false;
            }
            *group = patched;
            view.revision += 1;
            outcome = Ok(true);
            true
        });
        outcome
    }

    pub fn remove_group(&self, group_id: GroupId) -> bool {
        self.sender.send_if_modified(|view| {
            let before = view.groups.len();
            view.groups.retain(|g| g.id != group_id);
            let removed = view.groups.len() != before;
            if removed {
                view.revision += 1;
            }
            removed
        })
    }

    /// Drop the view entirely, invalidating any outstanding epoch.
    pub fn clear(&self) {
        self.sender.send_modify(|view| {
            *view = VisibleGroups {
                revision: view.revision + 1,
                epoch: view.epoch + 1,
                ..Default::default()
            };
        });
    }

    pub fn snapshot(&self) -> VisibleGroups {
        self.sender.borrow().clone()
    }

    pub fn group(&self, group_id: GroupId) -> Option<Group> {
        self.sender.borrow().group(group_id).cloned()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.sender.borrow().groups.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VisibleGroups> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: GroupId, name: &str) -> Group {
        Group {
            id,
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_snapshot_replaces_groups_and_clears_loading() {
        let cache = GroupCache::new();
        let epoch = cache.begin("alice");
        assert!(cache.snapshot().loading);

        assert!(cache.apply_snapshot(epoch, vec![group(1, "one")]));
        let view = cache.snapshot();
        assert!(!view.loading);
        assert_eq!(view.user_id.as_deref(), Some("alice"));
        assert_eq!(view.last_diff.added, vec![1]);
    }

    #[test]
    fn test_stale_epoch_is_ignored() {
        let cache = GroupCache::new();
        let old = cache.begin("alice");
        let new = cache.begin("bob");
        assert_ne!(old, new);

        assert!(!cache.apply_snapshot(old, vec![group(1, "alice's")]));
        assert!(cache.snapshot().groups.is_empty());
        assert_eq!(cache.snapshot().user_id.as_deref(), Some("bob"));

        cache.clear();
        assert!(!cache.apply_snapshot(new, vec![group(2, "bob's")]));
        assert_eq!(cache.snapshot().user_id, None);
    }

    #[test]
    fn test_patch_and_remove() {
        let cache = GroupCache::new();
        let epoch = cache.begin("alice");
        cache.apply_snapshot(epoch, vec![group(1, "one")]);
        let revision = cache.snapshot().revision;

        assert!(cache.patch_group(1, |g| g.name = "renamed".into()));
        assert!(!cache.patch_group(9, |g| g.name = "ghost".into()));
        assert_eq!(cache.group(1).unwrap().name, "renamed");
        assert_eq!(cache.snapshot().revision, revision + 1);

        assert!(cache.remove_group(1));
        assert!(!cache.remove_group(1));
        assert!(cache.groups().is_empty());
    }

    #[test]
    fn test_rejected_patch_leaves_view_untouched() {
        let cache = GroupCache::new();
        let epoch = cache.begin("alice");
        cache.apply_snapshot(epoch, vec![group(1, "one")]);
        let before = cache.snapshot();

        let outcome = cache.try_patch_group(1, |g| {
            g.name = "half-applied".into();
            Err(crate::error::GroupError::Validation("rejected".into()))
        });
        assert!(matches!(outcome, Err(crate::error::GroupError::Validation(_))));
        assert_eq!(cache.snapshot(), before);

        assert!(!cache.try_patch_group(9, |_| Ok(())).unwrap());
        assert!(cache
            .try_patch_group(1, |g| {
                g.name = "renamed".into();
                Ok(())
            })
            .unwrap());
        assert_eq!(cache.group(1).unwrap().name, "renamed");
        assert_eq!(cache.snapshot().revision, before.revision + 1);
    }

    #[test]
    fn test_identical_snapshot_does_not_notify() {
        let cache = GroupCache::new();
        let epoch = cache.begin("alice");
        let groups = vec![group(1, "one")];
        assert!(cache.apply_snapshot(epoch, groups.clone()));

        let rx = cache.subscribe();
        assert!(!cache.apply_snapshot(epoch, groups));
        assert!(!rx.has_changed().unwrap());
    }
}
