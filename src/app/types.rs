// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(JobState::Pending),
            "running" => Some(JobState::Running),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Payload for creating a job row together with its ongoing sibling.
#[derive(Debug, Clone)]
pub struct NewJobRow {
    pub id: String,
    pub name: String,
    pub guild_id: String,
    pub expiry: Option<Duration>,
    pub fields: Value,
    pub resumable: bool,
    pub initial_opts: Value,
}

/// Full stored job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub id: String,
    pub name: String,
    pub guild_id: String,
    pub expiry: Option<Duration>,
    pub output_filename: Option<String>,
    pub fields: Value,
    pub statuses: Vec<Value>,
    pub resumable: bool,
    pub state: JobState,
    pub created_at: String, // RFC3339
}

/// The output of a job: a named byte buffer handed to object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Durable progress of a resumable job. `state` names the next step to
/// execute; empty means "start at the first step" and `"completed"` means all
/// steps are done. `data` is additive scratch memory owned by step code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

impl Progress {
    pub fn start() -> Self {
        Progress::default()
    }

    pub fn with_data(data: serde_json::Map<String, Value>) -> Self {
        Progress {
            state: String::new(),
            data,
        }
    }
}

/// Body of the `/spawn` RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct Spawn {
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub execute: bool,
    /// If create is false, the id of the job to resume.
    #[serde(default)]
    pub id: String,
    pub guild_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnResponse {
    pub id: String,
}

// Guild model. These shapes mirror what the platform serves; only the fields
// the jobs touch are modelled, everything else rides along as raw values.

pub mod features {
    pub const COMMUNITY: &str = "COMMUNITY";
    pub const ANIMATED_ICON: &str = "ANIMATED_ICON";
    pub const ANIMATED_BANNER: &str = "ANIMATED_BANNER";
    pub const BANNER: &str = "BANNER";
    pub const INVITE_SPLASH: &str = "INVITE_SPLASH";
}

pub mod verification_level {
    pub const NONE: u8 = 0;
    pub const LOW: u8 = 1;
    pub const MEDIUM: u8 = 2;
}

const CDN_BASE: &str = "https://cdn.discordapp.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    pub fn avatar_url(&self) -> String {
        match &self.avatar {
            Some(hash) if !hash.is_empty() => {
                format!("{CDN_BASE}/avatars/{}/{hash}.png", self.id)
            }
            _ => format!("{CDN_BASE}/embed/avatars/0.png"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub hoist: bool,
    pub position: i64,
    #[serde(default)]
    pub permissions: u64,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub mentionable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelType {
    Text,
    Dm,
    Voice,
    Category,
    News,
    NewsThread,
    PublicThread,
    PrivateThread,
    Stage,
    Forum,
    Other(u8),
}

impl From<u8> for ChannelType {
    fn from(raw: u8) -> Self {
        match raw {
            0 => ChannelType::Text,
            1 => ChannelType::Dm,
            2 => ChannelType::Voice,
            4 => ChannelType::Category,
            5 => ChannelType::News,
            10 => ChannelType::NewsThread,
            11 => ChannelType::PublicThread,
            12 => ChannelType::PrivateThread,
            13 => ChannelType::Stage,
            15 => ChannelType::Forum,
            other => ChannelType::Other(other),
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(kind: ChannelType) -> Self {
        match kind {
            ChannelType::Text => 0,
            ChannelType::Dm => 1,
            ChannelType::Voice => 2,
            ChannelType::Category => 4,
            ChannelType::News => 5,
            ChannelType::NewsThread => 10,
            ChannelType::PublicThread => 11,
            ChannelType::PrivateThread => 12,
            ChannelType::Stage => 13,
            ChannelType::Forum => 15,
            ChannelType::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum OverwriteKind {
    Role,
    Member,
}

impl From<u8> for OverwriteKind {
    fn from(raw: u8) -> Self {
        match raw {
            1 => OverwriteKind::Member,
            _ => OverwriteKind::Role,
        }
    }
}

impl From<OverwriteKind> for u8 {
    fn from(kind: OverwriteKind) -> Self {
        match kind {
            OverwriteKind::Role => 0,
            OverwriteKind::Member => 1,
        }
    }
}

/// Per-channel permission delta keyed by role or user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OverwriteKind,
    #[serde(default)]
    pub allow: u64,
    #[serde(default)]
    pub deny: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub user_limit: u32,
    #[serde(default)]
    pub rate_limit_per_user: u32,
    #[serde(default)]
    pub permission_overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub banner: String,
    #[serde(default)]
    pub splash: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub afk_timeout: u32,
    #[serde(default)]
    pub verification_level: u8,
    #[serde(default)]
    pub default_message_notifications: u8,
    #[serde(default)]
    pub explicit_content_filter: u8,
    #[serde(default)]
    pub rules_channel_id: String,
    #[serde(default)]
    pub public_updates_channel_id: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub stickers: Vec<Value>,
}

impl Guild {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    pub fn icon_url(&self) -> String {
        format!("{CDN_BASE}/icons/{}/{}.png", self.id, self.icon)
    }

    pub fn banner_url(&self) -> String {
        format!("{CDN_BASE}/banners/{}/{}.png", self.id, self.banner)
    }

    pub fn splash_url(&self) -> String {
        format!("{CDN_BASE}/splashes/{}/{}.png", self.id, self.splash)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: User,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub embeds: Vec<Value>,
    #[serde(default)]
    pub components: Vec<Value>,
    #[serde(default)]
    pub attachments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub channel_id: String,
}

// Write payloads sent back to the platform.

#[derive(Debug, Clone, Default, Serialize)]
pub struct GuildEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_message_notifications: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub afk_timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_content_filter: Option<u8>,
    /// Data URIs when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_updates_channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    pub hoist: bool,
    pub permissions: u64,
    pub mentionable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelCreate {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    pub topic: String,
    pub bitrate: u32,
    pub user_limit: u32,
    pub rate_limit_per_user: u32,
    pub position: i64,
    pub permission_overwrites: Vec<PermissionOverwrite>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub parent_id: String,
    pub nsfw: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookFile {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookPayload {
    pub content: String,
    pub username: String,
    pub avatar_url: String,
    pub embeds: Vec<Value>,
    pub components: Vec<Value>,
    pub tts: bool,
    pub files: Vec<WebhookFile>,
}

impl WebhookPayload {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
            && self.files.is_empty()
            && self.embeds.is_empty()
            && self.components.is_empty()
    }
}

/// Result of an asset download: the bytes plus the server-reported mime type.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}
