// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Channel allocation planning: distribute a global message quota across a
//! guild's channels, then stream the plan through a worker with rollover of
//! unused quota.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::app::errors::JobResult;
use crate::app::perms::{has_permission, member_channel_perms};
use crate::app::types::{Channel, ChannelType, Guild, Member};

/// A mapping that keeps insertion order and round-trips through JSON as a
/// plain object, so downstream streaming stays deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

pub type AllocationMap = OrderedMap<u64>;

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        OrderedMap {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, key: String, value: V) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(std::marker::PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = OrderedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    out.insert(key, value);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(std::marker::PhantomData))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("special allocation references channel {0} which is not eligible")]
    UnknownSpecialChannel(String),
}

/// The guild's channels filtered to an explicit list; an empty list means all
/// channels, in the guild's declared order.
pub fn channels_from_list(guild: &Guild, filter: &[String]) -> Vec<Channel> {
    if filter.is_empty() {
        return guild.channels.clone();
    }
    guild
        .channels
        .iter()
        .filter(|channel| filter.iter().any(|id| *id == channel.id))
        .cloned()
        .collect()
}

/// Builds the per-channel quota plan. Channels of a disallowed type, or where
/// the bot misses any of `needed_perms`, are excluded. Each included channel
/// gets its special override or the default, truncated so the running total
/// never exceeds `max_messages`.
#[allow(clippy::too_many_arguments)]
pub fn create_channel_allocations(
    base_perms: u64,
    guild: &Guild,
    member: &Member,
    needed_perms: &[u64],
    allowed_types: &[ChannelType],
    channels: &[Channel],
    special_allocations: &HashMap<String, u64>,
    per_channel: u64,
    max_messages: u64,
) -> Result<AllocationMap, AllocationError> {
    let mut map = AllocationMap::new();
    let mut total = 0u64;

    for channel in channels {
        if !allowed_types.contains(&channel.kind) {
            continue;
        }

        let perms = member_channel_perms(base_perms, guild, member, channel);
        if needed_perms
            .iter()
            .any(|needed| !has_permission(perms, *needed))
        {
            continue;
        }

        let mut quota = special_allocations
            .get(&channel.id)
            .copied()
            .unwrap_or(per_channel);
        if total + quota > max_messages {
            quota = max_messages - total;
        }

        map.insert(channel.id.clone(), quota);
        total += quota;
    }

    for id in special_allocations.keys() {
        if !map.contains_key(id) {
            return Err(AllocationError::UnknownSpecialChannel(id.clone()));
        }
    }

    Ok(map)
}

/// Drives a worker over the plan in map order. The worker reports how much of
/// its quota it actually consumed; with a non-zero rollover base the unused
/// remainder raises subsequent quotas, capped so the running total never
/// exceeds `max_messages`.
pub async fn channel_allocation_stream<F>(
    map: &AllocationMap,
    mut worker: F,
    max_messages: u64,
    rollover_base: u64,
) -> JobResult<()>
where
    F: for<'a> FnMut(&'a str, u64) -> Pin<Box<dyn Future<Output = JobResult<u64>> + Send + 'a>>,
{
    let mut leftover = 0u64;
    let mut consumed_total = 0u64;

    for (channel_id, base_quota) in map.iter() {
        let mut quota = *base_quota;
        if rollover_base > 0 {
            quota = (base_quota + leftover).min(max_messages.saturating_sub(consumed_total));
        }

        let collected = worker(channel_id, quota).await?.min(quota);
        consumed_total += collected;
        leftover = quota - collected;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::perms::permissions;
    use crate::app::types::{PermissionOverwrite, OverwriteKind, Role, User};

    fn text_channel(id: &str) -> Channel {
        Channel {
            id: id.into(),
            kind: ChannelType::Text,
            name: id.into(),
            topic: String::new(),
            position: 0,
            parent_id: String::new(),
            nsfw: false,
            bitrate: 0,
            user_limit: 0,
            rate_limit_per_user: 0,
            permission_overwrites: vec![],
        }
    }

    fn guild(channels: Vec<Channel>) -> Guild {
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
            roles: vec![Role {
                id: "G".into(),
                name: "@everyone".into(),
                color: 0,
                hoist: false,
                position: 0,
                permissions: permissions::VIEW_CHANNEL,
                managed: false,
                mentionable: false,
            }],
            channels,
            stickers: vec![],
        }
    }

    fn bot_member() -> Member {
        Member {
            user: User {
                id: "bot".into(),
                username: "bot".into(),
                avatar: None,
                bot: true,
            },
            roles: vec![],
        }
    }

    fn plan(
        guild: &Guild,
        special: &HashMap<String, u64>,
        per_channel: u64,
        max_messages: u64,
    ) -> Result<AllocationMap, AllocationError> {
        let member = bot_member();
        let base = crate::app::perms::base_permissions(guild, &member);
        create_channel_allocations(
            base,
            guild,
            &member,
            &[permissions::VIEW_CHANNEL],
            &[ChannelType::Text],
            &guild.channels,
            special,
            per_channel,
            max_messages,
        )
    }

    #[test]
    fn quotas_truncate_at_the_global_ceiling() {
        let guild = guild(vec![
            text_channel("A"),
            text_channel("B"),
            text_channel("C"),
        ]);
        let map = plan(&guild, &HashMap::new(), 100, 250).unwrap();
        let quotas: Vec<(&str, u64)> = map.iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(quotas, vec![("A", 100), ("B", 100), ("C", 50)]);
        let total: u64 = map.iter().map(|(_, v)| *v).sum();
        assert!(total <= 250);
    }

    #[test]
    fn channels_after_overflow_get_zero() {
        let guild = guild(vec![
            text_channel("A"),
            text_channel("B"),
            text_channel("C"),
        ]);
        let map = plan(&guild, &HashMap::new(), 100, 100).unwrap();
        assert_eq!(map.get("A"), Some(&100));
        assert_eq!(map.get("B"), Some(&0));
        assert_eq!(map.get("C"), Some(&0));
    }

    #[test]
    fn special_allocations_override_the_default() {
        let guild = guild(vec![text_channel("A"), text_channel("B")]);
        let special = HashMap::from([("B".to_string(), 10u64)]);
        let map = plan(&guild, &special, 100, 1000).unwrap();
        assert_eq!(map.get("A"), Some(&100));
        assert_eq!(map.get("B"), Some(&10));
    }

    #[test]
    fn special_allocation_for_excluded_channel_errors() {
        let guild = guild(vec![text_channel("A")]);
        let special = HashMap::from([("missing".to_string(), 10u64)]);
        let err = plan(&guild, &special, 100, 1000).unwrap_err();
        assert_eq!(
            err,
            AllocationError::UnknownSpecialChannel("missing".to_string())
        );
    }

    #[test]
    fn channels_without_permission_are_excluded() {
        let mut hidden = text_channel("hidden");
        hidden.permission_overwrites = vec![PermissionOverwrite {
            id: "G".into(),
            kind: OverwriteKind::Role,
            allow: 0,
            deny: permissions::VIEW_CHANNEL,
        }];
        let guild = guild(vec![text_channel("A"), hidden]);
        let map = plan(&guild, &HashMap::new(), 100, 1000).unwrap();
        assert!(map.contains_key("A"));
        assert!(!map.contains_key("hidden"));
    }

    #[test]
    fn disallowed_channel_types_are_excluded() {
        let mut category = text_channel("cat");
        category.kind = ChannelType::Category;
        let guild = guild(vec![category, text_channel("A")]);
        let map = plan(&guild, &HashMap::new(), 100, 1000).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("A"));
    }

    #[test]
    fn json_round_trip_preserves_order() {
        let mut map = AllocationMap::new();
        map.insert("zebra".into(), 3);
        map.insert("apple".into(), 1);
        map.insert("mango".into(), 2);

        let encoded = serde_json::to_string(&map).unwrap();
        let decoded: AllocationMap = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, map);
        let keys: Vec<&str> = decoded.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zebra", "apple", "mango"]);
    }

    #[tokio::test]
    async fn stream_rolls_leftovers_forward() {
        let mut map = AllocationMap::new();
        map.insert("A".into(), 100);
        map.insert("B".into(), 100);
        map.insert("C".into(), 50);

        let mut seen = Vec::new();
        channel_allocation_stream(
            &map,
            |id, quota| {
                Box::pin(async move {
                    seen.push((id.to_string(), quota));
                    // A only consumes 40 of its 100.
                    Ok(if id == "A" { 40 } else { quota })
                })
            },
            250,
            100,
        )
        .await
        .unwrap();

        assert_eq!(
            seen,
            vec![
                ("A".to_string(), 100),
                ("B".to_string(), 160),
                ("C".to_string(), 50),
            ]
        );
    }

    #[tokio::test]
    async fn stream_discards_leftovers_without_rollover() {
        let mut map = AllocationMap::new();
        map.insert("A".into(), 100);
        map.insert("B".into(), 100);

        let mut seen = Vec::new();
        channel_allocation_stream(
            &map,
            |id, quota| {
                Box::pin(async move {
                    seen.push((id.to_string(), quota));
                    Ok(0)
                })
            },
            200,
            0,
        )
        .await
        .unwrap();

        assert_eq!(seen, vec![("A".to_string(), 100), ("B".to_string(), 100)]);
    }

    #[tokio::test]
    async fn stream_never_exceeds_the_global_ceiling() {
        let mut map = AllocationMap::new();
        map.insert("A".into(), 100);
        map.insert("B".into(), 100);
        map.insert("C".into(), 50);

        let mut handed_out = 0u64;
        channel_allocation_stream(
            &map,
            |_, quota| {
                Box::pin(async move {
                    handed_out += quota;
                    Ok(quota)
                })
            },
            250,
            100,
        )
        .await
        .unwrap();
        assert!(handed_out <= 250);
    }

    #[tokio::test]
    async fn stream_halts_on_worker_error() {
        let mut map = AllocationMap::new();
        map.insert("A".into(), 10);
        map.insert("B".into(), 10);

        let mut calls = 0;
        let err = channel_allocation_stream(
            &map,
            |_, _| {
                Box::pin(async move {
                    calls += 1;
                    Err(crate::app::errors::JobError::platform("down"))
                })
            },
            20,
            0,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::app::errors::JobError::Platform(_)));
        assert_eq!(calls, 1);
    }
}
