/// Configuration for the group layer
#[derive(Debug, Clone)]
pub struct GroupsConfig {
    /// Collection holding group documents (default: "groups")
    pub collection: String,

    /// Collection holding user profiles (default: "users")
    pub users_collection: String,

    /// Patch the cached view when the backend is unreachable (default: true)
    pub optimistic_updates: bool,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            collection: "groups".to_string(),
            users_collection: "users".to_string(),
            optimistic_updates: true,
        }
    }
}
