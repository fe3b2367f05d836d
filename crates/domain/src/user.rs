//! User identity resolution.
//!
//! Channel adapters attach a [`UserBinding`] to inbound messages; the
//! loop resolves it to a configured [`UserConfig`] to pick up the user's
//! tool/skill policies and profile document.

use crate::config::UserConfig;
use crate::message::UserBinding;

/// Resolve a binding against the configured users.
///
/// Identities match by (channel, stable id) first, then by
/// (channel, username); a direct `user_id` match wins over both.
pub fn resolve_user<'a>(
    users: &'a [UserConfig],
    channel: &str,
    binding: &UserBinding,
) -> Option<&'a UserConfig> {
    if !binding.user_id.is_empty() {
        if let Some(user) = users.iter().find(|u| u.id == binding.user_id) {
            return Some(user);
        }
    }

    if let Some(stable_id) = binding.channel_user_id.as_deref() {
        let found = users.iter().find(|u| {
            u.identities
                .iter()
                .any(|i| i.channel == channel && i.channel_user_id.as_deref() == Some(stable_id))
        });
        if found.is_some() {
            return found;
        }
    }

    if let Some(username) = binding.channel_username.as_deref() {
        return users.iter().find(|u| {
            u.identities
                .iter()
                .any(|i| i.channel == channel && i.channel_username.as_deref() == Some(username))
        });
    }

    None
}
