// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::types::{ChannelType, Message};

/// Category key under which backup and restore jobs share a per-guild
/// concurrency budget.
pub const BACKUP_CONCURRENCY_CATEGORY: &str = "backup-related";

pub const REDACTED: &str = "[redacted]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCreateConstraints {
    /// The maximum number of messages to backup
    pub total_max_messages: u64,
    /// The minimum number of messages per channel
    pub min_per_channel: u64,
    /// The default number of messages per channel
    pub default_per_channel: u64,
    /// The quality to use when reencoding guild assets to JPEG
    pub guild_asset_reencode_quality: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRestoreConstraints {
    pub role_delete_sleep: Duration,
    pub role_create_sleep: Duration,
    pub channel_delete_sleep: Duration,
    pub channel_create_sleep: Duration,
    pub send_message_sleep: Duration,
    pub http_client_timeout: Duration,
    /// The maximum size of a backup file to download/use
    pub max_body_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConstraints {
    pub create: BackupCreateConstraints,
    pub restore: BackupRestoreConstraints,
    /// How many backup/restore jobs can run concurrently per guild
    pub max_server_backups: u32,
}

pub fn free_plan_backup_constraints() -> BackupConstraints {
    BackupConstraints {
        create: BackupCreateConstraints {
            total_max_messages: 1000,
            min_per_channel: 1,
            default_per_channel: 100,
            guild_asset_reencode_quality: 85,
        },
        restore: BackupRestoreConstraints {
            role_delete_sleep: Duration::from_secs(1),
            role_create_sleep: Duration::from_secs(2),
            channel_delete_sleep: Duration::from_millis(500),
            channel_create_sleep: Duration::from_millis(500),
            send_message_sleep: Duration::from_millis(350),
            http_client_timeout: Duration::from_secs(10),
            max_body_size: 250_000_000,
        },
        max_server_backups: 1,
    }
}

pub(crate) const ALLOWED_CHANNEL_TYPES: &[ChannelType] = &[
    ChannelType::Text,
    ChannelType::News,
    ChannelType::NewsThread,
    ChannelType::PublicThread,
    ChannelType::PrivateThread,
    ChannelType::Forum,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRestoreMode {
    #[default]
    Full,
    /// Retained in the data model; rejected at validation as unimplemented.
    Diff,
    IgnoreExisting,
}

/// Options that can be set when creating a backup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupCreateOpts {
    /// If set, restrict the backup to these channels
    pub channels: Vec<String>,
    /// The number of messages per channel
    pub per_channel: u64,
    /// The maximum number of messages to backup
    pub max_messages: u64,
    pub backup_messages: bool,
    /// Which of icon/banner/splash to back up
    pub backup_guild_assets: Vec<String>,
    /// Skip channels whose message collection fails instead of aborting
    pub ignore_message_backup_errors: bool,
    /// Roll unused per-channel quota over to later channels
    pub rollover_leftovers: bool,
    /// Specific channel allocation overrides
    pub special_allocations: HashMap<String, u64>,
    /// Encryption is a design hook; non-empty values are rejected
    pub encrypt: String,
}

/// Options that can be set when restoring a backup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupRestoreOpts {
    /// Log and continue on per-item restore failures instead of aborting
    pub ignore_restore_errors: bool,
    /// Channels to protect from being deleted
    pub protected_channels: Vec<String>,
    /// Roles to protect from being deleted
    pub protected_roles: Vec<String>,
    /// `https://` URL or `job://<job_id>/<filename>` reference
    pub backup_source: String,
    /// Decryption hook, mirrors `encrypt`
    pub decrypt: String,
    pub channel_restore_mode: ChannelRestoreMode,
}

/// A backed up message as stored in a `messages/<channel_id>` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMessage {
    pub message: Message,
}
