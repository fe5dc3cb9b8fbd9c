//! User profiles and phone-number lookup

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use syncit_store::{Document, DocumentStore};
use tracing::{debug, info, warn};

use crate::error::{GroupError, Result};
use crate::models::{initials_for, UserId};

/// Fewer digits than this cannot identify a phone line
const MIN_PHONE_DIGITS: usize = 10;

/// A registered user, stored in the users collection keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    #[serde(skip)]
    pub id: UserId,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub initials: String,
    pub country_code: String,
    pub profile_completed: bool,
}

impl UserProfile {
    /// Country code and local number as one digit string
    pub fn full_phone(&self) -> String {
        format!("{}{}", self.country_code, self.phone)
            .chars()
            .filter(char::is_ascii_digit)
            .collect()
    }

    /// Phone as shown to other users
    pub fn display_phone(&self) -> String {
        if self.country_code.is_empty() {
            self.phone.clone()
        } else {
            format!("{} {}", self.country_code, self.phone)
        }
    }
}

/// A registered user found through a phone number
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactUser {
    pub id: UserId,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub initials: String,
    pub is_from_contacts: bool,
}

/// Every digit-only form under which `number` may have been saved.
///
/// UK numbers gain or lose the `44` prefix in place of a leading `0`; US
/// numbers gain or lose the leading `1`.
pub fn normalize_phone_number(number: &str) -> BTreeSet<String> {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    let mut formats = BTreeSet::new();

    if digits.starts_with('0') && digits.len() == 11 {
        formats.insert(format!("44{}", &digits[1..]));
    }
    if digits.starts_with("44") && digits.len() == 12 {
        formats.insert(format!("0{}", &digits[2..]));
    }
    if digits.starts_with('1') && digits.len() == 11 {
        formats.insert(digits[1..].to_string());
    }
    if digits.len() == 10 && !digits.starts_with('0') {
        formats.insert(format!("1{}", digits));
    }

    formats.insert(digits);
    formats
}

fn is_dialable(formats: &BTreeSet<String>) -> bool {
    formats.iter().any(|f| f.len() >= MIN_PHONE_DIGITS)
}

pub struct UserDirectory {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
        }
    }

    /// Create or overwrite a profile. Initials are derived from the name when
    /// not supplied.
    pub async fn save_profile(&self, mut profile: UserProfile) -> Result<UserProfile> {
        if profile.id.trim().is_empty() {
            return Err(GroupError::Validation("user id is required".to_string()));
        }
        if profile.initials.is_empty() {
            profile.initials = initials_for(&profile.name);
        }

        let Value::Object(fields) =
            serde_json::to_value(&profile).map_err(|e| GroupError::Storage(e.to_string()))?
        else {
            return Err(GroupError::Storage(
                "profile did not serialize to an object".to_string(),
            ));
        };

        if self.store.get(&self.collection, &profile.id).await?.is_some() {
            self.store
                .update(&self.collection, &profile.id, fields)
                .await?;
            debug!("Updated profile {}", profile.id);
        } else {
            self.store
                .create(&self.collection, &profile.id, fields)
                .await?;
            info!("Created profile {}", profile.id);
        }

        Ok(profile)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let document = self.store.get(&self.collection, user_id).await?;
        Ok(document.and_then(|doc| profile_from_document(&doc)))
    }

    pub async fn all_users(&self) -> Result<Vec<UserProfile>> {
        let documents = self.store.list(&self.collection).await?;
        Ok(documents.iter().filter_map(profile_from_document).collect())
    }

    /// First registered user reachable under any form of `number`
    pub async fn search_by_phone(&self, number: &str) -> Result<Option<ContactUser>> {
        let wanted = normalize_phone_number(number);
        if !is_dialable(&wanted) {
            debug!("Phone lookup for '{}' has too few digits", number);
            return Ok(None);
        }

        let found = self.all_users().await?.into_iter().find(|user| {
            !user.phone.is_empty()
                && !user.country_code.is_empty()
                && !normalize_phone_number(&user.full_phone()).is_disjoint(&wanted)
        });

        Ok(found.map(|user| ContactUser {
            phone: user.display_phone(),
            id: user.id,
            name: user.name,
            email: user.email,
            initials: user.initials,
            is_from_contacts: false,
        }))
    }

    /// Registered users among `numbers`, shown with the number as given
    pub async fn match_contacts(&self, numbers: &[String]) -> Result<Vec<ContactUser>> {
        let mut by_format: HashMap<String, &str> = HashMap::new();
        for number in numbers {
            for format in normalize_phone_number(number) {
                if format.len() >= MIN_PHONE_DIGITS {
                    by_format.insert(format, number);
                }
            }
        }

        let matched = self
            .all_users()
            .await?
            .into_iter()
            .filter_map(|user| {
                let original = normalize_phone_number(&user.full_phone())
                    .iter()
                    .find_map(|format| by_format.get(format).copied())?;
                Some(ContactUser {
                    phone: original.to_string(),
                    id: user.id,
                    name: user.name,
                    email: user.email,
                    initials: user.initials,
                    is_from_contacts: true,
                })
            })
            .collect::<Vec<_>>();

        debug!(
            "Matched {} of {} contact numbers",
            matched.len(),
            numbers.len()
        );
        Ok(matched)
    }
}

fn profile_from_document(document: &Document) -> Option<UserProfile> {
    match serde_json::from_value::<UserProfile>(Value::Object(document.data.clone())) {
        Ok(mut profile) => {
            profile.id = document.id.clone();
            Some(profile)
        }
        Err(e) => {
            warn!("Skipping user document {}: {}", document.id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncit_store::MemoryDocumentStore;

    fn formats(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_uk_variants() {
        assert_eq!(
            normalize_phone_number("07926 111222"),
            formats(&["07926111222", "447926111222"])
        );
        assert_eq!(
            normalize_phone_number("+44 7926 111222"),
            formats(&["447926111222", "07926111222"])
        );
    }

    #[test]
    fn test_us_variants() {
        assert_eq!(
            normalize_phone_number("(712) 345-6789"),
            formats(&["7123456789", "17123456789"])
        );
        assert_eq!(
            normalize_phone_number("+1 712 345 6789"),
            formats(&["17123456789", "7123456789"])
        );
    }

    #[test]
    fn test_short_numbers_have_no_variants() {
        assert_eq!(normalize_phone_number("12-34"), formats(&["1234"]));
        assert!(!is_dialable(&normalize_phone_number("12-34")));
    }

    fn directory() -> UserDirectory {
        UserDirectory::new(Arc::new(MemoryDocumentStore::new()), "users")
    }

    fn profile(id: &str, name: &str, country_code: &str, phone: &str) -> UserProfile {
        UserProfile {
            id: id.into(),
            name: name.into(),
            country_code: country_code.into(),
            phone: phone.into(),
            profile_completed: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_save_derives_initials_and_overwrites() {
        let dir = directory();
        let saved = dir
            .save_profile(profile("alice", "Alice Smith", "+44", "7926111222"))
            .await
            .unwrap();
        assert_eq!(saved.initials, "AS");

        dir.save_profile(profile("alice", "Alice Jones", "+44", "7926111222"))
            .await
            .unwrap();
        let loaded = dir.get_user("alice").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Alice Jones");
        assert_eq!(loaded.id, "alice");
        assert_eq!(dir.all_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_by_phone_matches_local_format() {
        let dir = directory();
        dir.save_profile(profile("alice", "Alice", "+44", "7926111222"))
            .await
            .unwrap();
        dir.save_profile(profile("bob", "Bob", "+1", "7123456789"))
            .await
            .unwrap();

        let found = dir.search_by_phone("07926 111222").await.unwrap().unwrap();
        assert_eq!(found.id, "alice");
        assert_eq!(found.phone, "+44 7926111222");

        let found = dir.search_by_phone("712-345-6789").await.unwrap().unwrap();
        assert_eq!(found.id, "bob");

        assert!(dir.search_by_phone("12345").await.unwrap().is_none());
        assert!(dir.search_by_phone("07000 000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_match_contacts_keeps_contact_formatting() {
        let dir = directory();
        dir.save_profile(profile("alice", "Alice", "+44", "7926111222"))
            .await
            .unwrap();
        dir.save_profile(profile("carol", "Carol", "+44", "7000999888"))
            .await
            .unwrap();

        let matched = dir
            .match_contacts(&["07926 111 222".to_string(), "555".to_string()])
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "alice");
        assert_eq!(matched[0].phone, "07926 111 222");
        assert!(matched[0].is_from_contacts);
    }
}
