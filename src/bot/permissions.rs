use crate::types::{ChatUser, PermissionLevel};

/// Check a user against a required level.
///
/// Broadcasters pass everything, moderators pass anything up to moderator,
/// subscribers satisfy subscriber and regular, regulars satisfy regular.
pub fn has_permission(user: &ChatUser, required: PermissionLevel) -> bool {
    if user.is_broadcaster {
        return true;
    }
    if required == PermissionLevel::Broadcaster {
        return false;
    }
    if user.is_mod && PermissionLevel::Moderator >= required {
        return true;
    }
    if matches!(required, PermissionLevel::Subscriber | PermissionLevel::Regular) {
        if user.is_subscriber {
            return true;
        }
        if required == PermissionLevel::Regular && user.is_regular {
            return true;
        }
    }
    required == PermissionLevel::Everyone
}
