//! Per-user "seen" flags on events
//!
//! A new event is stamped `true` for every member except its creator. A flag
//! only ever flips to `false` through the viewing user's own acknowledgment,
//! and a missing flag reads as new.

use chrono::Utc;

use crate::models::{Event, Group, Member};

/// Mark `event` as new for every member other than `creator` and set its
/// creation time.
pub fn stamp_new_event(event: &mut Event, members: &[Member], creator: &str) {
    event.is_new_for_user = members
        .iter()
        .filter(|m| m.id != creator)
        .map(|m| (m.id.clone(), true))
        .collect();
    event.created_at = Some(Utc::now());
}

/// Record that `user_id` has seen `event`. Returns whether the flag changed.
pub fn mark_viewed(event: &mut Event, user_id: &str) -> bool {
    event.is_new_for_user.insert(user_id.to_string(), false) != Some(false)
}

/// The creator never sees their own event as new; everyone else does until
/// their flag is explicitly cleared.
pub fn is_event_new_for_user(event: &Event, user_id: &str) -> bool {
    if user_id.is_empty() || event.created_by == user_id {
        return false;
    }
    event.is_new_for_user.get(user_id) != Some(&false)
}

pub fn has_new_events(group: &Group, user_id: &str) -> bool {
    group
        .events
        .iter()
        .any(|event| is_event_new_for_user(event, user_id))
}

pub fn count_new_events(group: &Group, user_id: &str) -> usize {
    group
        .events
        .iter()
        .filter(|event| is_event_new_for_user(event, user_id))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, MemberStatus};
    use chrono::NaiveDate;

    fn member(id: &str) -> Member {
        Member {
            id: id.to_string(),
            status: MemberStatus::Accepted,
            ..Default::default()
        }
    }

    fn event_by(creator: &str) -> Event {
        Event {
            id: 1,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            time: None,
            notes: "Picnic".into(),
            event_type: EventType::AllDay,
            user: creator.to_uppercase(),
            user_initials: String::new(),
            created_by: creator.to_string(),
            created_at: None,
            is_new_for_user: Default::default(),
        }
    }

    #[test]
    fn test_creator_never_sees_own_event_as_new() {
        let members = [member("a"), member("b"), member("c")];
        let mut event = event_by("a");
        stamp_new_event(&mut event, &members, "a");

        assert!(!is_event_new_for_user(&event, "a"));
        assert!(is_event_new_for_user(&event, "b"));
        assert!(is_event_new_for_user(&event, "c"));
        assert!(!event.is_new_for_user.contains_key("a"));
        assert!(event.created_at.is_some());
    }

    #[test]
    fn test_mark_viewed_only_affects_viewer() {
        let members = [member("a"), member("b"), member("c")];
        let mut event = event_by("a");
        stamp_new_event(&mut event, &members, "a");

        assert!(mark_viewed(&mut event, "b"));

        assert!(!is_event_new_for_user(&event, "b"));
        assert!(is_event_new_for_user(&event, "c"));
    }

    #[test]
    fn test_mark_viewed_is_idempotent() {
        let mut event = event_by("a");
        assert!(mark_viewed(&mut event, "b"));
        let once = event.clone();

        assert!(!mark_viewed(&mut event, "b"));
        assert_eq!(event, once);
        assert!(!is_event_new_for_user(&event, "b"));
    }

    #[test]
    fn test_missing_flag_reads_as_new() {
        let event = event_by("a");
        assert!(is_event_new_for_user(&event, "late-joiner"));
        assert!(!is_event_new_for_user(&event, ""));
    }

    #[test]
    fn test_group_level_counts() {
        let members = [member("a"), member("b")];
        let mut first = event_by("a");
        stamp_new_event(&mut first, &members, "a");
        let mut second = event_by("b");
        second.id = 2;
        stamp_new_event(&mut second, &members, "b");

        let group = Group {
            events: vec![first, second],
            ..Default::default()
        };

        assert_eq!(count_new_events(&group, "a"), 1);
        assert_eq!(count_new_events(&group, "b"), 1);
        assert!(has_new_events(&group, "a"));
        assert_eq!(count_new_events(&group, "stranger"), 2);
    }
}
