// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::{Channel, Guild, Member, OverwriteKind};

pub mod permissions {
    pub const ADMINISTRATOR: u64 = 1 << 3;
    pub const MANAGE_CHANNELS: u64 = 1 << 4;
    pub const VIEW_CHANNEL: u64 = 1 << 10;
    pub const SEND_MESSAGES: u64 = 1 << 11;
    pub const SEND_TTS_MESSAGES: u64 = 1 << 12;
    pub const MANAGE_MESSAGES: u64 = 1 << 13;
    pub const READ_MESSAGE_HISTORY: u64 = 1 << 16;
    pub const MANAGE_ROLES: u64 = 1 << 28;
    pub const MANAGE_WEBHOOKS: u64 = 1 << 29;

    pub const ALL: u64 = u64::MAX;
}

pub fn has_permission(perms: u64, wanted: u64) -> bool {
    perms & wanted == wanted
}

/// Guild-level permissions of a member: the union of its role permissions
/// over the `@everyone` baseline. Owners and administrators get everything.
pub fn base_permissions(guild: &Guild, member: &Member) -> u64 {
    if !guild.owner_id.is_empty() && guild.owner_id == member.user.id {
        return permissions::ALL;
    }

    let mut perms = guild
        .roles
        .iter()
        .find(|role| role.id == guild.id)
        .map(|role| role.permissions)
        .unwrap_or(0);

    for role in &guild.roles {
        if member.roles.iter().any(|id| *id == role.id) {
            perms |= role.permissions;
        }
    }

    if has_permission(perms, permissions::ADMINISTRATOR) {
        return permissions::ALL;
    }

    perms
}

/// Channel-level permissions: fold the channel's overwrites over the base
/// permissions in the platform's documented order (`@everyone` overwrite,
/// accumulated role overwrites, then the member overwrite).
pub fn member_channel_perms(base: u64, guild: &Guild, member: &Member, channel: &Channel) -> u64 {
    if has_permission(base, permissions::ADMINISTRATOR) {
        return permissions::ALL;
    }

    let mut perms = base;

    for overwrite in &channel.permission_overwrites {
        if overwrite.kind == OverwriteKind::Role && overwrite.id == guild.id {
            perms &= !overwrite.deny;
            perms |= overwrite.allow;
            break;
        }
    }

    let mut allow = 0u64;
    let mut deny = 0u64;
    for overwrite in &channel.permission_overwrites {
        if overwrite.kind == OverwriteKind::Role
            && overwrite.id != guild.id
            && member.roles.iter().any(|id| *id == overwrite.id)
        {
            allow |= overwrite.allow;
            deny |= overwrite.deny;
        }
    }
    perms &= !deny;
    perms |= allow;

    for overwrite in &channel.permission_overwrites {
        if overwrite.kind == OverwriteKind::Member && overwrite.id == member.user.id {
            perms &= !overwrite.deny;
            perms |= overwrite.allow;
            break;
        }
    }

    perms
}

#[cfg(test)]
mod tests {
    use super::permissions::*;
    use super::*;
    use crate::app::types::{ChannelType, PermissionOverwrite, Role, User};

    fn guild_with_roles(roles: Vec<Role>) -> Guild {
        Guild {
            id: "G".into(),
            name: "guild".into(),
            description: String::new(),
            icon: String::new(),
            banner: String::new(),
            splash: String::new(),
            owner_id: "owner".into(),
            features: vec![],
            afk_timeout: 0,
            verification_level: 0,
            default_message_notifications: 0,
            explicit_content_filter: 0,
            rules_channel_id: String::new(),
            public_updates_channel_id: String::new(),
            roles,
            channels: vec![],
            stickers: vec![],
        }
    }

    fn role(id: &str, permissions: u64) -> Role {
        Role {
            id: id.into(),
            name: id.into(),
            color: 0,
            hoist: false,
            position: 0,
            permissions,
            managed: false,
            mentionable: false,
        }
    }

    fn member(id: &str, roles: &[&str]) -> Member {
        Member {
            user: User {
                id: id.into(),
                username: id.into(),
                avatar: None,
                bot: true,
            },
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn channel(overwrites: Vec<PermissionOverwrite>) -> Channel {
        Channel {
            id: "C".into(),
            kind: ChannelType::Text,
            name: "general".into(),
            topic: String::new(),
            position: 0,
            parent_id: String::new(),
            nsfw: false,
            bitrate: 0,
            user_limit: 0,
            rate_limit_per_user: 0,
            permission_overwrites: overwrites,
        }
    }

    #[test]
    fn base_permissions_union_of_member_roles() {
        let guild = guild_with_roles(vec![
            role("G", VIEW_CHANNEL),
            role("r1", SEND_MESSAGES),
            role("r2", MANAGE_MESSAGES),
        ]);
        let member = member("bot", &["r1"]);
        let perms = base_permissions(&guild, &member);
        assert!(has_permission(perms, VIEW_CHANNEL | SEND_MESSAGES));
        assert!(!has_permission(perms, MANAGE_MESSAGES));
    }

    #[test]
    fn administrator_grants_everything() {
        let guild = guild_with_roles(vec![role("G", 0), role("admin", ADMINISTRATOR)]);
        let member = member("bot", &["admin"]);
        assert_eq!(base_permissions(&guild, &member), ALL);
    }

    #[test]
    fn owner_grants_everything() {
        let guild = guild_with_roles(vec![role("G", 0)]);
        let member = member("owner", &[]);
        assert_eq!(base_permissions(&guild, &member), ALL);
    }

    #[test]
    fn channel_overwrites_fold_in_order() {
        let guild = guild_with_roles(vec![role("G", VIEW_CHANNEL | SEND_MESSAGES), role("r1", 0)]);
        let member = member("bot", &["r1"]);
        // @everyone denies sending, the member's role re-allows it.
        let channel = channel(vec![
            PermissionOverwrite {
                id: "G".into(),
                kind: OverwriteKind::Role,
                allow: 0,
                deny: SEND_MESSAGES,
            },
            PermissionOverwrite {
                id: "r1".into(),
                kind: OverwriteKind::Role,
                allow: SEND_MESSAGES,
                deny: 0,
            },
        ]);
        let base = base_permissions(&guild, &member);
        let perms = member_channel_perms(base, &guild, &member, &channel);
        assert!(has_permission(perms, SEND_MESSAGES));
    }

    #[test]
    fn member_overwrite_wins_over_role_overwrites() {
        let guild = guild_with_roles(vec![role("G", VIEW_CHANNEL)]);
        let member = member("bot", &[]);
        let channel = channel(vec![PermissionOverwrite {
            id: "bot".into(),
            kind: OverwriteKind::Member,
            allow: 0,
            deny: VIEW_CHANNEL,
        }]);
        let base = base_permissions(&guild, &member);
        let perms = member_channel_perms(base, &guild, &member, &channel);
        assert!(!has_permission(perms, VIEW_CHANNEL));
    }
}
