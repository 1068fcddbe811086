//! Document paths used by the server.

pub const TEMPLATES: &str = "app/config/quest-templates.json";
pub const ADMIN: &str = "app/config/admin.json";
pub const USERS_PREFIX: &str = "app/users/";
pub const ASSIGNMENTS_PREFIX: &str = "app/assignments/";
pub const BACKUPS_PREFIX: &str = "app/backups/";

const MAX_ID_LEN: usize = 64;

/// Ids become path segments, so keep them to a safe alphabet
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn user(user_id: &str) -> String {
    format!("{}{}.json", USERS_PREFIX, user_id)
}

/// Quest state of one user for one day
pub fn assignment(date: &str, user_id: &str) -> String {
    format!("{}{}/{}.json", ASSIGNMENTS_PREFIX, date, user_id)
}

pub fn backup(name: &str) -> String {
    format!("{}{}.json", BACKUPS_PREFIX, name)
}

/// Recover the user id from a user document path
pub fn user_id_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(USERS_PREFIX)?.strip_suffix(".json")
}

/// Recover the backup name from a backup document path
pub fn backup_name_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(BACKUPS_PREFIX)?.strip_suffix(".json")
}

/// Whether an assignment path belongs to `user_id`
pub fn is_assignment_of(path: &str, user_id: &str) -> bool {
    path.strip_prefix(ASSIGNMENTS_PREFIX)
        .and_then(|rest| rest.split_once('/'))
        .is_some_and(|(_, file)| file == format!("{}.json", user_id))
}
