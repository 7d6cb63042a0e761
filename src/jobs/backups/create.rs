// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::macros::format_description;

use crate::app::alloc::{channel_allocation_stream, channels_from_list, create_channel_allocations};
use crate::app::errors::{JobError, JobResult};
use crate::app::perms::{base_permissions, permissions};
use crate::app::sectioned::{Meta, SectionedFileWriter};
use crate::app::types::{Message, Output};
use crate::jobs::backups::types::{
    ALLOWED_CHANNEL_TYPES, BACKUP_CONCURRENCY_CATEGORY, BackupConstraints, BackupCreateOpts,
    BackupMessage, REDACTED, free_plan_backup_constraints,
};
use crate::jobs::{JobEnv, JobImpl, OperationMode, PresetInfo, ProgressHandle};

pub const JOB_NAME: &str = "guild_create_backup";

/// A job to create a full backup of a guild: settings, roles, channels,
/// assets and (optionally) messages, packed into a sectioned container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerBackupCreate {
    /// Auto-set from the plan on the server; required for local runs.
    pub constraints: Option<BackupConstraints>,
    pub options: BackupCreateOpts,
}

impl ServerBackupCreate {
    pub fn from_spawn_data(data: Value) -> JobResult<Box<dyn JobImpl>> {
        Ok(Box::new(crate::jobs::options_from_spawn_data::<
            ServerBackupCreate,
        >(data)?))
    }

    fn constraints(&self) -> JobResult<&BackupConstraints> {
        self.constraints
            .as_ref()
            .ok_or_else(|| JobError::internal("backup constraints not initialised"))
    }
}

#[async_trait]
impl JobImpl for ServerBackupCreate {
    fn name(&self) -> &'static str {
        JOB_NAME
    }

    fn fields(&self) -> Value {
        let mut options = self.options.clone();
        if !options.encrypt.is_empty() {
            options.encrypt = REDACTED.to_string();
        }
        json!({
            "constraints": self.constraints,
            "options": options,
        })
    }

    fn expiry(&self) -> Option<Duration> {
        None
    }

    fn resumable(&self) -> bool {
        false
    }

    fn initial_opts(&self) -> JobResult<Value> {
        serde_json::to_value(self).map_err(|err| JobError::internal(err.to_string()))
    }

    async fn validate(&mut self, env: &JobEnv) -> JobResult<()> {
        match env.mode {
            OperationMode::Jobs => {
                self.constraints = Some(free_plan_backup_constraints());
            }
            OperationMode::LocalJobs => {
                if self.constraints.is_none() {
                    return Err(JobError::validation("constraints are required"));
                }
            }
        }
        let constraints = self.constraints()?.clone();

        if !self.options.encrypt.is_empty() {
            return Err(JobError::validation("encryption is currently disabled"));
        }

        if self.options.max_messages == 0 {
            self.options.max_messages = constraints.create.total_max_messages;
        }
        if self.options.per_channel == 0 {
            self.options.per_channel = constraints.create.default_per_channel;
        }

        if self.options.per_channel < constraints.create.min_per_channel {
            return Err(JobError::validation(format!(
                "per_channel cannot be less than {}",
                constraints.create.min_per_channel
            )));
        }
        if self.options.max_messages > constraints.create.total_max_messages {
            return Err(JobError::validation(format!(
                "max_messages cannot be greater than {}",
                constraints.create.total_max_messages
            )));
        }
        if self.options.per_channel > self.options.max_messages {
            return Err(JobError::validation(
                "per_channel cannot be greater than max_messages",
            ));
        }

        if env
            .concurrency
            .count(BACKUP_CONCURRENCY_CATEGORY, &env.guild_id)
            >= constraints.max_server_backups
        {
            return Err(JobError::ConcurrencyExceeded {
                category: BACKUP_CONCURRENCY_CATEGORY,
                limit: constraints.max_server_backups,
            });
        }

        Ok(())
    }

    async fn exec<'a>(
        &'a self,
        env: &'a JobEnv,
        _progress: &'a ProgressHandle,
    ) -> JobResult<Option<Output>> {
        let constraints = self.constraints()?;
        let _slot = env
            .concurrency
            .try_acquire(
                BACKUP_CONCURRENCY_CATEGORY,
                &env.guild_id,
                constraints.max_server_backups,
            )
            .ok_or(JobError::ConcurrencyExceeded {
                category: BACKUP_CONCURRENCY_CATEGORY,
                limit: constraints.max_server_backups,
            })?;

        let mut file = SectionedFileWriter::new()?;
        file.write_json_section("backup_opts", &self.options)?;

        tracing::info!("fetching bot member state in guild");
        let member = env
            .platform
            .guild_member(&env.guild_id, &env.bot_user.id)
            .await?;
        file.write_json_section("dbg/bot", &member)?;

        tracing::info!("backing up guild settings");
        let mut guild = env.platform.guild(&env.guild_id).await?;
        if guild.channels.is_empty() {
            guild.channels = env.platform.guild_channels(&env.guild_id).await?;
        }
        if guild.roles.is_empty() {
            tracing::info!("backing up guild roles");
            guild.roles = env.platform.guild_roles(&env.guild_id).await?;
        }

        let base_perms = base_permissions(&guild, &member);
        file.write_json_section("dbg/basePerms", &base_perms)?;

        if guild.stickers.is_empty() {
            tracing::info!("backing up guild stickers");
            guild.stickers = env.platform.guild_stickers(&env.guild_id).await?;
        }

        file.write_json_section("core/guild", &guild)?;

        tracing::info!(assets = ?self.options.backup_guild_assets, "backing up guild assets");
        for asset in &self.options.backup_guild_assets {
            match asset.as_str() {
                "icon" => {
                    if guild.icon.is_empty() {
                        continue;
                    }
                    backup_guild_asset(env, constraints, &mut file, "guildIcon", &guild.icon_url())
                        .await?;
                }
                "banner" => {
                    if guild.banner.is_empty() {
                        continue;
                    }
                    backup_guild_asset(
                        env,
                        constraints,
                        &mut file,
                        "guildBanner",
                        &guild.banner_url(),
                    )
                    .await?;
                }
                "splash" => {
                    if guild.splash.is_empty() {
                        continue;
                    }
                    backup_guild_asset(
                        env,
                        constraints,
                        &mut file,
                        "guildSplash",
                        &guild.splash_url(),
                    )
                    .await?;
                }
                other => {
                    return Err(JobError::validation(format!(
                        "unknown guild asset to backup: {other}"
                    )));
                }
            }
        }

        if self.options.backup_messages {
            let allocations = create_channel_allocations(
                base_perms,
                &guild,
                &member,
                &[permissions::VIEW_CHANNEL],
                ALLOWED_CHANNEL_TYPES,
                &channels_from_list(&guild, &self.options.channels),
                &self.options.special_allocations,
                self.options.per_channel,
                self.options.max_messages,
            )
            .map_err(|err| JobError::validation(err.to_string()))?;

            tracing::info!(channels = allocations.len(), "created channel allocations");
            file.write_json_section("dbg/chanAlloc", &allocations)?;

            let rollover_base = if self.options.rollover_leftovers {
                self.options.per_channel
            } else {
                0
            };
            channel_allocation_stream(
                &allocations,
                |channel_id, allocation| {
                    let file = &mut file;
                    Box::pin(async move {
                    tracing::info!(channel_id, allocation, "backing up channel messages");
                    let (messages, failure) =
                        collect_channel_messages(env, channel_id, allocation).await;

                    // Whatever was already collected is persisted even when
                    // the collection later failed.
                    if !messages.is_empty() {
                        file.write_json_section(&format!("messages/{channel_id}"), &messages)?;
                    }
                    let collected = messages.len() as u64;

                    match failure {
                        None => Ok(collected),
                        Some(err) if self.options.ignore_message_backup_errors => {
                            tracing::error!(channel_id, error = %err, "error backing up channel messages, skipping channel");
                            Ok(collected)
                        }
                        Some(err) => Err(err),
                    }
                    })
                },
                self.options.max_messages,
                rollover_base,
            )
            .await?;
        }

        let created_at = env.clock.now_utc();
        let meta = Meta::server_backup(created_at, env.mode.as_str());
        let data = file.finish(&meta)?;

        let stamp = created_at
            .format(format_description!(
                "[year]-[month]-[day]-[hour]-[minute]-[second]"
            ))
            .map_err(|err| JobError::internal(err.to_string()))?;
        Ok(Some(Output {
            filename: format!("antiraid-backup-{stamp}.iblfile"),
            data,
        }))
    }

    fn local_presets(&self) -> PresetInfo {
        let mut constraints = free_plan_backup_constraints();
        constraints.create.min_per_channel = 50;
        PresetInfo {
            runnable: true,
            preset: json!({
                "constraints": constraints,
                "options": BackupCreateOpts {
                    per_channel: 100,
                    max_messages: 500,
                    backup_messages: true,
                    backup_guild_assets: vec!["icon".into(), "banner".into(), "splash".into()],
                    rollover_leftovers: true,
                    ..BackupCreateOpts::default()
                },
            }),
            comments: HashMap::from([
                (
                    "constraints.max_server_backups",
                    "Only 1 backup job should be running at any given time locally",
                ),
                (
                    "constraints.create.total_max_messages",
                    "Since this is a local job, we can afford to be more generous",
                ),
                (
                    "options.backup_messages",
                    "This is a local job so backing up messages is likely faster and desired",
                ),
                (
                    "options.ignore_message_backup_errors",
                    "We likely don't want errors ignored in local jobs",
                ),
            ]),
        }
    }
}

/// Collects up to `allocation` messages of a channel, newest first. Returns
/// whatever was gathered before a failure alongside the failure itself, so
/// partial progress can still be persisted.
async fn collect_channel_messages(
    env: &JobEnv,
    channel_id: &str,
    allocation: u64,
) -> (Vec<BackupMessage>, Option<JobError>) {
    let mut collected: Vec<BackupMessage> = Vec::new();
    let mut before: Option<String> = None;

    loop {
        if let Err(err) = env.ensure_active() {
            return (collected, Some(err));
        }
        if collected.len() as u64 >= allocation {
            break;
        }

        let limit = (allocation - collected.len() as u64).min(100) as u32;
        let page: Vec<Message> = match env
            .platform
            .channel_messages(channel_id, limit, before.as_deref())
            .await
        {
            Ok(page) => page,
            Err(err) => return (collected, Some(err)),
        };

        if page.is_empty() {
            break;
        }
        let page_len = page.len();
        before = page.last().map(|message| message.id.clone());
        collected.extend(page.into_iter().map(|message| BackupMessage { message }));
        if page_len < limit as usize {
            break;
        }
    }

    (collected, None)
}

/// Downloads a guild asset and re-encodes it to JPEG at the configured
/// quality; the re-encode both normalises the format and caps the size.
async fn backup_guild_asset(
    env: &JobEnv,
    constraints: &BackupConstraints,
    file: &mut SectionedFileWriter,
    name: &str,
    url: &str,
) -> JobResult<()> {
    tracing::info!(name, "backing up guild asset");
    let download = env
        .platform
        .download(
            url,
            constraints.restore.max_body_size,
            constraints.restore.http_client_timeout,
        )
        .await
        .map_err(|err| JobError::platform(format!("error fetching guild asset: {err}")))?;

    let decoded = image::load_from_memory(&download.bytes)
        .map_err(|err| JobError::format(format!("error decoding guild asset: {err}")))?;

    let mut encoded = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
        &mut encoded,
        constraints.create.guild_asset_reencode_quality,
    );
    decoded
        .write_with_encoder(encoder)
        .map_err(|err| JobError::internal(format!("error re-encoding guild asset: {err}")))?;

    env.ensure_active()?;
    file.write_section(&format!("assets/{name}"), encoded.get_ref())
}
