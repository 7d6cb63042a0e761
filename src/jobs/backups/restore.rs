// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::app::errors::{JobError, JobResult};
use crate::app::perms::{base_permissions, has_permission, member_channel_perms, permissions};
use crate::app::sectioned::{FORMAT_NAME, FORMAT_VERSION, SectionedFile};
use crate::app::step::{
    Step, StepFuture, StepOutcome, Stepper, decode_progress, save_intermediate,
};
use crate::app::types::{
    Channel, ChannelCreate, ChannelType, Guild, GuildEdit, Member, Output, OverwriteKind,
    PermissionOverwrite, Progress, Role, RoleCreate, WebhookFile, WebhookPayload, features,
    verification_level,
};
use crate::jobs::backups::types::{
    BACKUP_CONCURRENCY_CATEGORY, BackupConstraints, BackupCreateOpts, BackupMessage,
    BackupRestoreOpts, ChannelRestoreMode, REDACTED, free_plan_backup_constraints,
};
use crate::jobs::{JobEnv, JobImpl, OperationMode, PresetInfo, ProgressHandle};

pub const JOB_NAME: &str = "guild_restore_backup";

const WEBHOOK_NAME: &str = "Anti-Raid Message Restore";

/// Replaying a message longer than the platform's content ceiling moves the
/// body into an attachment instead.
const MAX_MESSAGE_CONTENT_CHARS: usize = 2000;

/// A job to restore a guild from a backup file. Runs as an eight-state
/// protocol where every state resumes independently from persisted progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerBackupRestore {
    /// Auto-set from the plan on the server; required for local runs.
    pub constraints: Option<BackupConstraints>,
    pub options: BackupRestoreOpts,
}

impl ServerBackupRestore {
    pub fn from_spawn_data(data: Value) -> JobResult<Box<dyn JobImpl>> {
        Ok(Box::new(crate::jobs::options_from_spawn_data::<
            ServerBackupRestore,
        >(data)?))
    }

    fn constraints(&self) -> JobResult<&BackupConstraints> {
        self.constraints
            .as_ref()
            .ok_or_else(|| JobError::internal("restore constraints not initialised"))
    }
}

#[async_trait]
impl JobImpl for ServerBackupRestore {
    fn name(&self) -> &'static str {
        JOB_NAME
    }

    fn fields(&self) -> Value {
        let mut options = self.options.clone();
        if !options.decrypt.is_empty() {
            options.decrypt = REDACTED.to_string();
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
        true
    }

    fn initial_opts(&self) -> JobResult<Value> {
        serde_json::to_value(self).map_err(|err| JobError::internal(err.to_string()))
    }

    async fn validate(&mut self, env: &JobEnv) -> JobResult<()> {
        if self.constraints.is_none() || env.mode == OperationMode::Jobs {
            self.constraints = Some(free_plan_backup_constraints());
        }
        let constraints = self.constraints()?.clone();

        if self.options.backup_source.is_empty() {
            return Err(JobError::validation("backup_source is required"));
        }
        let source = self.options.backup_source.as_str();
        match env.mode {
            OperationMode::Jobs => {
                if !source.starts_with("https://") && !source.starts_with("job://") {
                    return Err(JobError::validation(
                        "backup_source must be a valid URL or a Job ID",
                    ));
                }
            }
            OperationMode::LocalJobs => {
                if !source.starts_with("file://")
                    && !source.starts_with("http://")
                    && !source.starts_with("https://")
                {
                    return Err(JobError::validation(
                        "backup_source must be a valid URL or file path",
                    ));
                }
            }
        }

        if self.options.channel_restore_mode == ChannelRestoreMode::Diff {
            return Err(JobError::validation(
                "channel_restore_mode 'diff' is not yet supported due to the complexity of the approach",
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
        progress: &'a ProgressHandle,
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

        tracing::info!(source = %self.options.backup_source, "downloading backup");
        let payload = env
            .download_backup(
                &self.options.backup_source,
                constraints.restore.max_body_size,
                constraints.restore.http_client_timeout,
            )
            .await?;

        tracing::info!(bytes = payload.len(), "parsing backup");
        let file = SectionedFile::open(&payload)?;
        let meta = file.meta()?;
        if meta.name != FORMAT_NAME || meta.version != FORMAT_VERSION {
            return Err(JobError::format(format!(
                "unsupported backup format {}/{}",
                meta.name, meta.version
            )));
        }
        let backup_opts: BackupCreateOpts = file.read_json_section("backup_opts")?;

        tracing::info!("fetching bot member state in guild");
        let member = env
            .platform
            .guild_member(&env.guild_id, &env.bot_user.id)
            .await?;

        tracing::info!("fetching guild object");
        let mut tgt_guild = env.platform.guild(&env.guild_id).await?;
        if tgt_guild.roles.is_empty() {
            tgt_guild.roles = env.platform.guild_roles(&env.guild_id).await?;
        }

        let base_perms = base_permissions(&tgt_guild, &member);
        if !has_permission(base_perms, permissions::MANAGE_CHANNELS) {
            return Err(JobError::validation(
                "bot does not have 'Manage Channels' permissions",
            ));
        }
        if !has_permission(base_perms, permissions::MANAGE_ROLES) {
            return Err(JobError::validation(
                "bot does not have 'Manage Roles' permissions",
            ));
        }
        if !has_permission(base_perms, permissions::MANAGE_WEBHOOKS) {
            return Err(JobError::validation(
                "bot does not have 'Manage Webhooks' permissions",
            ));
        }

        let bot_highest_role = highest_member_role(&tgt_guild, &member)
            .ok_or_else(|| JobError::validation("bot does not have any roles"))?;
        if bot_highest_role.position <= 0 {
            return Err(JobError::validation("bot role isnt high enough"));
        }
        tracing::info!(
            role_id = %bot_highest_role.id,
            role_position = bot_highest_role.position,
            "got bots highest role"
        );

        tgt_guild.channels = env.platform.guild_channels(&env.guild_id).await?;

        let src_guild: Guild = file.read_json_section("core/guild")?;
        if src_guild.id.is_empty() {
            return Err(JobError::format(
                "guild data is invalid [id is empty], likely an internal decoding error",
            ));
        }

        let src_is_community = src_guild.has_feature(features::COMMUNITY);
        let tgt_is_community = tgt_guild.has_feature(features::COMMUNITY);
        if src_is_community && !tgt_is_community {
            return Err(JobError::validation(
                "cannot restore community server to non-community server",
            ));
        }

        let run = RestoreRun {
            options: self.options.clone(),
            constraints: constraints.clone(),
            file,
            backup_opts,
            src_guild,
            tgt_guild,
            member,
            base_perms,
            bot_highest_role,
            src_is_community,
            tgt_is_community,
        };

        // Resumability starts here.
        let stepper = Stepper::new(vec![
            Step::new("edit_base_guild", step_edit_base_guild),
            Step::new("delete_old_roles", step_delete_old_roles),
            Step::new("create_new_roles", step_create_new_roles),
            Step::new("delete_old_channels", step_delete_old_channels),
            Step::new("create_new_channels", step_create_new_channels),
            Step::new("update_guild_features", step_update_guild_features),
            Step::new("create_webhook_if_needed", step_create_webhook_if_needed),
            Step::new("restore_messages", step_restore_messages),
        ]);
        let output = stepper.run(&run, env, progress).await?;

        tracing::info!("server restore complete");
        Ok(output)
    }

    fn local_presets(&self) -> PresetInfo {
        PresetInfo {
            runnable: true,
            preset: json!({
                "constraints": free_plan_backup_constraints(),
                "options": BackupRestoreOpts::default(),
            }),
            comments: HashMap::from([
                (
                    "constraints.max_server_backups",
                    "Only 1 backup job should be running at any given time locally",
                ),
                (
                    "options.protected_channels",
                    "Edit this to protect channels from being deleted",
                ),
                (
                    "options.protected_roles",
                    "Edit this to protect roles from being deleted",
                ),
                (
                    "options.channel_restore_mode",
                    "Should be full unless you know what you're doing",
                ),
            ]),
        }
    }
}

/// The bot's highest role; for equal positions the higher id wins.
fn highest_member_role<'a>(guild: &'a Guild, member: &Member) -> Option<Role> {
    let mut highest: Option<&'a Role> = None;
    for role in &guild.roles {
        if !member.roles.iter().any(|id| *id == role.id) {
            continue;
        }
        highest = match highest {
            None => Some(role),
            Some(best)
                if role.position > best.position
                    || (role.position == best.position && role.id > best.id) =>
            {
                Some(role)
            }
            Some(best) => Some(best),
        };
    }
    highest.cloned()
}

fn image_data_uri(mime: &str, data: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(data))
}

fn progress_data<T: Serialize>(key: &str, value: &T) -> JobResult<serde_json::Map<String, Value>> {
    let mut map = serde_json::Map::new();
    map.insert(
        key.to_string(),
        serde_json::to_value(value).map_err(|err| JobError::internal(err.to_string()))?,
    );
    Ok(map)
}

// Persisted progress decoded at step entry. Keys are shared across steps:
// `restoredRoleMap` is written by role creation and read by channel creation,
// `restoredChannelsMap` by everything after it.

#[derive(Debug, Default, Deserialize)]
struct RoleStepState {
    #[serde(rename = "restoredRoleMap", default)]
    restored_role_map: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelStepState {
    #[serde(rename = "ignoredChannels", default)]
    ignored_channels: Vec<String>,
    #[serde(rename = "restoredRoleMap", default)]
    restored_role_map: HashMap<String, String>,
    #[serde(rename = "restoredChannelsMap", default)]
    restored_channels_map: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct RestoredChannelsState {
    #[serde(rename = "restoredChannelsMap", default)]
    restored_channels_map: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageStepState {
    #[serde(rename = "restoredChannelsMap", default)]
    restored_channels_map: HashMap<String, String>,
    #[serde(rename = "doneChannels", default)]
    done_channels: HashMap<String, Vec<String>>,
    #[serde(default)]
    webhook_id: String,
    #[serde(default)]
    webhook_token: String,
}

/// Everything the restore steps share, assembled by the pre-flight.
struct RestoreRun {
    options: BackupRestoreOpts,
    constraints: BackupConstraints,
    file: SectionedFile,
    backup_opts: BackupCreateOpts,
    src_guild: Guild,
    tgt_guild: Guild,
    member: Member,
    base_perms: u64,
    bot_highest_role: Role,
    src_is_community: bool,
    tgt_is_community: bool,
}

fn step_edit_base_guild<'a>(
    run: &'a RestoreRun,
    env: &'a JobEnv,
    progress: &'a ProgressHandle,
    current: &'a Progress,
) -> StepFuture<'a> {
    Box::pin(run.edit_base_guild(env, progress, current))
}

fn step_delete_old_roles<'a>(
    run: &'a RestoreRun,
    env: &'a JobEnv,
    progress: &'a ProgressHandle,
    current: &'a Progress,
) -> StepFuture<'a> {
    Box::pin(run.delete_old_roles(env, progress, current))
}

fn step_create_new_roles<'a>(
    run: &'a RestoreRun,
    env: &'a JobEnv,
    progress: &'a ProgressHandle,
    current: &'a Progress,
) -> StepFuture<'a> {
    Box::pin(run.create_new_roles(env, progress, current))
}

fn step_delete_old_channels<'a>(
    run: &'a RestoreRun,
    env: &'a JobEnv,
    progress: &'a ProgressHandle,
    current: &'a Progress,
) -> StepFuture<'a> {
    Box::pin(run.delete_old_channels(env, progress, current))
}

fn step_create_new_channels<'a>(
    run: &'a RestoreRun,
    env: &'a JobEnv,
    progress: &'a ProgressHandle,
    current: &'a Progress,
) -> StepFuture<'a> {
    Box::pin(run.create_new_channels(env, progress, current))
}

fn step_update_guild_features<'a>(
    run: &'a RestoreRun,
    env: &'a JobEnv,
    progress: &'a ProgressHandle,
    current: &'a Progress,
) -> StepFuture<'a> {
    Box::pin(run.update_guild_features(env, progress, current))
}

fn step_create_webhook_if_needed<'a>(
    run: &'a RestoreRun,
    env: &'a JobEnv,
    progress: &'a ProgressHandle,
    current: &'a Progress,
) -> StepFuture<'a> {
    Box::pin(run.create_webhook_if_needed(env, progress, current))
}

fn step_restore_messages<'a>(
    run: &'a RestoreRun,
    env: &'a JobEnv,
    progress: &'a ProgressHandle,
    current: &'a Progress,
) -> StepFuture<'a> {
    Box::pin(run.restore_messages(env, progress, current))
}

impl RestoreRun {
    /// State 1: basic guild settings. Region and owner are not restorable;
    /// verification level and the content filter are platform-rejected when a
    /// non-community source targets a community guild.
    async fn edit_base_guild(
        &self,
        env: &JobEnv,
        _progress: &ProgressHandle,
        _current: &Progress,
    ) -> JobResult<StepOutcome> {
        let mut edit = GuildEdit {
            name: Some(self.src_guild.name.clone()),
            description: Some(self.src_guild.description.clone()),
            default_message_notifications: Some(self.src_guild.default_message_notifications),
            afk_timeout: Some(self.src_guild.afk_timeout),
            ..GuildEdit::default()
        };

        if self.src_is_community || !self.tgt_is_community {
            edit.explicit_content_filter = Some(self.src_guild.explicit_content_filter);
            edit.verification_level = Some(self.src_guild.verification_level);
        }

        let can_use_icon = self.src_guild.has_feature(features::ANIMATED_ICON)
            || !self.src_guild.icon.starts_with("a_");
        let can_use_banner = (self.src_guild.has_feature(features::BANNER)
            && !self.src_guild.banner.starts_with("a_"))
            || self.src_guild.has_feature(features::ANIMATED_BANNER);
        let can_use_splash = self.src_guild.has_feature(features::INVITE_SPLASH)
            && !self.src_guild.splash.starts_with("a_");

        if !self.src_guild.icon.is_empty() {
            if can_use_icon {
                edit.icon = Some(
                    self.image_as_data_uri(env, "guildIcon", &self.src_guild.icon_url())
                        .await?,
                );
            } else {
                tracing::warn!("not restoring animated icon on unsupported guild");
            }
        }
        if !self.src_guild.banner.is_empty() {
            if can_use_banner {
                edit.banner = Some(
                    self.image_as_data_uri(env, "guildBanner", &self.src_guild.banner_url())
                        .await?,
                );
            } else {
                tracing::warn!("not restoring banner on unsupported guild");
            }
        }
        if !self.src_guild.splash.is_empty() {
            if can_use_splash {
                edit.splash = Some(
                    self.image_as_data_uri(env, "guildSplash", &self.src_guild.splash_url())
                        .await?,
                );
            } else {
                tracing::warn!("not restoring splash on unsupported guild");
            }
        }

        env.platform
            .edit_guild(&env.guild_id, &edit)
            .await
            .map_err(|err| JobError::platform(format!("failed to edit guild: {err}")))?;

        Ok(StepOutcome::Advance(Progress::default()))
    }

    /// Asset bytes come from the backup's `assets/` section when present,
    /// otherwise they are re-downloaded from the source URL.
    async fn image_as_data_uri(&self, env: &JobEnv, name: &str, url: &str) -> JobResult<String> {
        if let Some(bytes) = self.file.get(&format!("assets/{name}")) {
            tracing::info!(name, "using guild asset from backup");
            return Ok(image_data_uri("image/jpeg", bytes));
        }

        let download = env
            .platform
            .download(
                url,
                self.constraints.restore.max_body_size,
                self.constraints.restore.http_client_timeout,
            )
            .await
            .map_err(|err| JobError::platform(format!("error fetching guild asset: {err}")))?;
        let mime = download
            .content_type
            .filter(|mime| !mime.is_empty())
            .ok_or_else(|| JobError::platform("error fetching guild asset: no mime type"))?;
        Ok(image_data_uri(&mime, &download.bytes))
    }

    /// State 2: clear out the target's roles, leaving protected, managed and
    /// anything at or above the bot's own highest role.
    async fn delete_old_roles(
        &self,
        env: &JobEnv,
        _progress: &ProgressHandle,
        _current: &Progress,
    ) -> JobResult<StepOutcome> {
        for role in &self.tgt_guild.roles {
            if self.options.protected_roles.contains(&role.id) {
                continue;
            }
            if role.managed {
                continue;
            }
            if role.id == self.tgt_guild.id {
                continue; // @everyone
            }
            if role.id == self.bot_highest_role.id {
                continue;
            }
            if role.position > self.bot_highest_role.position {
                continue;
            }
            if role.position == self.bot_highest_role.position && role.id > self.bot_highest_role.id
            {
                // Equal positions: the higher id is the higher role.
                continue;
            }

            tracing::info!(name = %role.name, position = role.position, id = %role.id, "deleting role");
            match env.platform.delete_role(&env.guild_id, &role.id).await {
                Ok(()) => {}
                Err(err) if self.options.ignore_restore_errors => {
                    tracing::warn!(id = %role.id, error = %err, "failed to delete role but ignoring error");
                }
                Err(err) => {
                    return Err(JobError::platform(format!(
                        "failed to delete role: {err} with position of {}",
                        role.position
                    )));
                }
            }

            env.sleep(self.constraints.restore.role_delete_sleep).await?;
        }

        Ok(StepOutcome::Advance(Progress::default()))
    }

    /// State 3: recreate the source's roles top-down, persisting the source
    /// to target id mapping after every creation.
    async fn create_new_roles(
        &self,
        env: &JobEnv,
        progress: &ProgressHandle,
        current: &Progress,
    ) -> JobResult<StepOutcome> {
        let previous: RoleStepState = decode_progress(current)?;
        let mut restored = previous.restored_role_map;

        // Create order is position-descending since the platform assigns
        // positions starting from the top; equal positions break by higher id.
        let mut roles = self.src_guild.roles.clone();
        roles.sort_by(|a, b| {
            b.position
                .cmp(&a.position)
                .then_with(|| b.id.cmp(&a.id))
        });

        for role in &roles {
            if restored.contains_key(&role.id) {
                continue;
            }
            if self.options.protected_roles.contains(&role.id) {
                continue;
            }
            if role.managed {
                continue;
            }
            if role.id == self.src_guild.id {
                continue; // @everyone
            }

            tracing::info!(name = %role.name, final_position = role.position, id = %role.id, "creating role");
            let created = env
                .platform
                .create_role(
                    &env.guild_id,
                    &RoleCreate {
                        name: role.name.clone(),
                        color: if role.color == 0 {
                            None
                        } else {
                            Some(role.color)
                        },
                        hoist: role.hoist,
                        permissions: role.permissions,
                        mentionable: role.mentionable,
                    },
                )
                .await
                .map_err(|err| JobError::platform(format!("failed to create role: {err}")))?;

            restored.insert(role.id.clone(), created.id);
            save_intermediate(progress, current, progress_data("restoredRoleMap", &restored)?)
                .await?;

            env.sleep(self.constraints.restore.role_create_sleep).await?;
        }

        Ok(StepOutcome::Advance(Progress::with_data(progress_data(
            "restoredRoleMap",
            &restored,
        )?)))
    }

    /// State 4: delete the target's channels, remembering channels kept by
    /// `ignore_existing` mode.
    async fn delete_old_channels(
        &self,
        env: &JobEnv,
        _progress: &ProgressHandle,
        _current: &Progress,
    ) -> JobResult<StepOutcome> {
        let src_channel_ids: HashSet<&str> = self
            .src_guild
            .channels
            .iter()
            .map(|channel| channel.id.as_str())
            .collect();

        let mut ignored_channels: Vec<String> = Vec::new();
        for channel in &self.tgt_guild.channels {
            if self.options.protected_channels.contains(&channel.id) {
                continue;
            }
            if channel.id == self.tgt_guild.rules_channel_id
                || channel.id == self.tgt_guild.public_updates_channel_id
            {
                continue;
            }

            let perms = member_channel_perms(self.base_perms, &self.tgt_guild, &self.member, channel);
            if !has_permission(perms, permissions::MANAGE_CHANNELS) {
                tracing::warn!(channel_id = %channel.id, "not removing channel due to lack of 'Manage Channels' permissions");
                continue;
            }

            if self.options.channel_restore_mode == ChannelRestoreMode::IgnoreExisting
                && src_channel_ids.contains(channel.id.as_str())
            {
                ignored_channels.push(channel.id.clone());
                continue;
            }

            tracing::info!(name = %channel.name, position = channel.position, id = %channel.id, "deleting channel");
            env.platform
                .delete_channel(&channel.id)
                .await
                .map_err(|err| JobError::platform(format!("failed to delete channel: {err}")))?;

            env.sleep(self.constraints.restore.channel_delete_sleep)
                .await?;
        }

        Ok(StepOutcome::Advance(Progress::with_data(progress_data(
            "ignoredChannels",
            &ignored_channels,
        )?)))
    }

    /// State 5: recreate channels, categories first, translating permission
    /// overwrites and parents through the persisted maps.
    async fn create_new_channels(
        &self,
        env: &JobEnv,
        progress: &ProgressHandle,
        current: &Progress,
    ) -> JobResult<StepOutcome> {
        let previous: ChannelStepState = decode_progress(current)?;
        let ignored_channels = previous.ignored_channels;
        let role_map = previous.restored_role_map;
        let mut restored = previous.restored_channels_map;
        if !restored.is_empty() {
            tracing::info!("restoring channels from previous state");
        }

        for categories_pass in [true, false] {
            for channel in &self.src_guild.channels {
                let is_category = channel.kind == ChannelType::Category;
                if categories_pass != is_category {
                    continue;
                }
                if restored.contains_key(&channel.id) {
                    continue;
                }
                if ignored_channels.contains(&channel.id) {
                    restored.insert(channel.id.clone(), channel.id.clone());
                    continue;
                }

                let mut create = self.channel_create_payload(channel, &role_map);
                if !is_category && !channel.parent_id.is_empty() {
                    match restored.get(&channel.parent_id) {
                        Some(mapped) => create.parent_id = mapped.clone(),
                        None if self.options.ignore_restore_errors => {
                            tracing::warn!(parent_id = %channel.parent_id, "parent channel does not exist, skipping");
                            create.parent_id.clear();
                        }
                        None => {
                            return Err(JobError::platform("parent channel does not exist"));
                        }
                    }
                }

                tracing::info!(
                    name = %channel.name,
                    position = channel.position,
                    src_id = %channel.id,
                    parent_id = %create.parent_id,
                    "creating channel"
                );
                let created = env
                    .platform
                    .create_channel(&env.guild_id, &create)
                    .await
                    .map_err(|err| JobError::platform(format!("failed to create channel: {err}")))?;

                restored.insert(channel.id.clone(), created.id);
                save_intermediate(
                    progress,
                    current,
                    progress_data("restoredChannelsMap", &restored)?,
                )
                .await?;

                env.sleep(self.constraints.restore.channel_create_sleep)
                    .await?;
            }
        }

        Ok(StepOutcome::Advance(Progress::with_data(progress_data(
            "restoredChannelsMap",
            &restored,
        )?)))
    }

    /// Role overwrites are re-keyed through the restored role map; the
    /// source's `@everyone` key becomes the target's guild id; unmapped role
    /// overwrites are dropped. Member overwrites pass through unchanged.
    fn channel_create_payload(
        &self,
        channel: &Channel,
        role_map: &HashMap<String, String>,
    ) -> ChannelCreate {
        let mut overwrites = Vec::new();
        for overwrite in &channel.permission_overwrites {
            if overwrite.kind == OverwriteKind::Role {
                if let Some(mapped) = role_map.get(&overwrite.id) {
                    overwrites.push(PermissionOverwrite {
                        id: mapped.clone(),
                        kind: overwrite.kind,
                        allow: overwrite.allow,
                        deny: overwrite.deny,
                    });
                } else if overwrite.id == self.src_guild.id {
                    overwrites.push(PermissionOverwrite {
                        id: self.tgt_guild.id.clone(),
                        kind: overwrite.kind,
                        allow: overwrite.allow,
                        deny: overwrite.deny,
                    });
                }
            } else {
                overwrites.push(overwrite.clone());
            }
        }

        ChannelCreate {
            name: channel.name.clone(),
            kind: channel.kind,
            topic: channel.topic.clone(),
            bitrate: channel.bitrate,
            user_limit: channel.user_limit,
            rate_limit_per_user: channel.rate_limit_per_user,
            position: channel.position,
            permission_overwrites: overwrites,
            parent_id: channel.parent_id.clone(),
            nsfw: channel.nsfw,
        }
    }

    /// State 6: re-enable COMMUNITY when the source had it, pointing the
    /// rules and public-updates channels at their restored counterparts.
    async fn update_guild_features(
        &self,
        env: &JobEnv,
        _progress: &ProgressHandle,
        current: &Progress,
    ) -> JobResult<StepOutcome> {
        let previous: RestoredChannelsState = decode_progress(current)?;

        let mut edit = GuildEdit::default();
        let mut guild_features = self.tgt_guild.features.clone();

        if has_permission(self.base_perms, permissions::ADMINISTRATOR) {
            if self.src_guild.has_feature(features::COMMUNITY)
                && !guild_features.iter().any(|f| f == features::COMMUNITY)
            {
                let rules_channel = previous
                    .restored_channels_map
                    .get(&self.src_guild.rules_channel_id)
                    .filter(|id| !id.is_empty());
                let public_updates_channel = previous
                    .restored_channels_map
                    .get(&self.src_guild.public_updates_channel_id)
                    .filter(|id| !id.is_empty());

                if let (Some(rules), Some(updates)) = (rules_channel, public_updates_channel) {
                    edit.rules_channel_id = Some(rules.clone());
                    edit.public_updates_channel_id = Some(updates.clone());
                    guild_features.push(features::COMMUNITY.to_string());
                    if self.tgt_guild.verification_level == verification_level::NONE
                        || self.tgt_guild.verification_level == verification_level::LOW
                    {
                        edit.verification_level = Some(verification_level::MEDIUM);
                    }
                }
            }
        } else {
            tracing::warn!(
                base_perms = self.base_perms,
                "not admin, certain features cannot be edited (e.g. COMMUNITY)"
            );
        }

        edit.features = Some(guild_features);
        env.platform
            .edit_guild(&env.guild_id, &edit)
            .await
            .map_err(|err| JobError::platform(format!("failed to edit guild: {err}")))?;

        Ok(StepOutcome::Advance(Progress::default()))
    }

    /// State 7: a single webhook moved from channel to channel does all the
    /// message replay; only needed when the backup carries messages.
    async fn create_webhook_if_needed(
        &self,
        env: &JobEnv,
        _progress: &ProgressHandle,
        current: &Progress,
    ) -> JobResult<StepOutcome> {
        if !self.backup_opts.backup_messages {
            return Ok(StepOutcome::Continue);
        }

        tracing::info!("waiting 5 seconds to avoid platform API issues");
        env.sleep(Duration::from_secs(5)).await?;

        let previous: RestoredChannelsState = decode_progress(current)?;
        if previous.restored_channels_map.is_empty() {
            return Ok(StepOutcome::Continue); // no channels restored, skip
        }

        // Refetch for the post-restore channel list.
        let guild = env
            .platform
            .guild(&env.guild_id)
            .await
            .map_err(|err| JobError::platform(format!("failed to fetch guild: {err}")))?;
        let Some(channel) = guild.channels.iter().find(|channel| {
            matches!(
                channel.kind,
                ChannelType::Text | ChannelType::News | ChannelType::Voice
            )
        }) else {
            tracing::warn!("no channels to create webhook in");
            return Ok(StepOutcome::Continue);
        };

        match env.platform.create_webhook(&channel.id, WEBHOOK_NAME).await {
            Ok(webhook) => {
                let mut data = progress_data("webhook_id", &webhook.id)?;
                data.insert("webhook_token".to_string(), Value::String(webhook.token));
                Ok(StepOutcome::Advance(Progress::with_data(data)))
            }
            Err(err) if self.options.ignore_restore_errors => {
                tracing::warn!(channel_id = %channel.id, error = %err, "failed to create webhook, skipping message send");
                Ok(StepOutcome::Continue)
            }
            Err(err) => Err(JobError::platform(format!(
                "failed to create message send webhook: {err}"
            ))),
        }
    }

    /// State 8: replay backed-up messages oldest-first through the webhook,
    /// channel by channel, persisting every delivered message id. The webhook
    /// is deleted on success and failure alike.
    async fn restore_messages(
        &self,
        env: &JobEnv,
        progress: &ProgressHandle,
        current: &Progress,
    ) -> JobResult<StepOutcome> {
        if !self.backup_opts.backup_messages {
            return Ok(StepOutcome::Continue);
        }

        let mut state: MessageStepState = decode_progress(current)?;
        if state.webhook_id.is_empty() {
            return Ok(StepOutcome::Continue); // no webhook, skip
        }

        let result = self
            .restore_messages_inner(env, progress, current, &mut state)
            .await;

        if let Err(err) = env
            .platform
            .delete_webhook(&state.webhook_id, &state.webhook_token)
            .await
        {
            tracing::warn!(error = %err, "failed to delete message restore webhook");
        }

        result
    }

    async fn restore_messages_inner(
        &self,
        env: &JobEnv,
        progress: &ProgressHandle,
        current: &Progress,
        state: &mut MessageStepState,
    ) -> JobResult<StepOutcome> {
        let mut total_messages: u64 = state
            .done_channels
            .values()
            .map(|done| done.len() as u64)
            .sum();

        let channels = env
            .platform
            .guild_channels(&env.guild_id)
            .await
            .map_err(|err| JobError::platform(format!("failed to fetch channels: {err}")))?;
        let channel_by_id: HashMap<&str, &Channel> = channels
            .iter()
            .map(|channel| (channel.id.as_str(), channel))
            .collect();

        'channels: for src_channel in &self.src_guild.channels {
            let Some(restored_id) = state.restored_channels_map.get(&src_channel.id) else {
                continue;
            };
            let section = format!("messages/{}", src_channel.id);
            if !self.file.has(&section) {
                continue;
            }

            tracing::info!(
                backed_up_channel_id = %src_channel.id,
                restored_channel_id = %restored_id,
                "processing backed up channel messages"
            );

            let Some(channel) = channel_by_id.get(restored_id.as_str()) else {
                tracing::warn!(channel_id = %restored_id, "restored channel no longer exists, ignoring it");
                continue;
            };
            let perms = member_channel_perms(self.base_perms, &self.tgt_guild, &self.member, channel);
            if !has_permission(perms, permissions::MANAGE_WEBHOOKS) {
                tracing::error!(channel_id = %restored_id, "bot does not have 'Manage Webhooks' permissions in this channel, ignoring it");
                continue;
            }

            let messages: Vec<BackupMessage> = match self.file.read_json_section(&section) {
                Ok(messages) => messages,
                Err(_) if self.options.ignore_restore_errors => continue,
                Err(err) => return Err(err),
            };

            // Point the shared webhook at this channel.
            if let Err(err) = env
                .platform
                .edit_webhook_channel(&state.webhook_id, WEBHOOK_NAME, restored_id)
                .await
            {
                if self.options.ignore_restore_errors {
                    tracing::warn!(error = %err, "failed to edit webhook");
                    continue;
                }
                return Err(JobError::platform(format!("failed to edit webhook: {err}")));
            }

            // The backup collected newest-first; replay oldest-first.
            for backup_message in messages.iter().rev() {
                if total_messages > self.constraints.create.total_max_messages {
                    tracing::warn!(total_messages, "hit total max messages limit, stopping");
                    break 'channels;
                }

                let message = &backup_message.message;
                if state
                    .done_channels
                    .get(restored_id.as_str())
                    .is_some_and(|done| done.contains(&message.id))
                {
                    continue;
                }

                let mut payload = WebhookPayload {
                    content: message.content.clone(),
                    username: message.author.username.clone(),
                    avatar_url: message.author.avatar_url(),
                    embeds: message.embeds.clone(),
                    components: message.components.clone(),
                    tts: message.tts && has_permission(perms, permissions::SEND_TTS_MESSAGES),
                    files: Vec::new(),
                };

                if payload.content.chars().count() > MAX_MESSAGE_CONTENT_CHARS {
                    let content = std::mem::take(&mut payload.content);
                    payload.files.push(WebhookFile {
                        name: "context.txt".to_string(),
                        content_type: "text/plain".to_string(),
                        data: content.into_bytes(),
                    });
                }

                if payload.is_empty() {
                    continue;
                }

                if let Err(err) = env
                    .platform
                    .execute_webhook(&state.webhook_id, &state.webhook_token, &payload)
                    .await
                {
                    if self.options.ignore_restore_errors {
                        tracing::warn!(error = %err, "failed to send message");
                        continue;
                    }
                    return Err(JobError::platform(format!("failed to send message: {err}")));
                }

                state
                    .done_channels
                    .entry(restored_id.clone())
                    .or_default()
                    .push(message.id.clone());

                let mut data = progress_data("doneChannels", &state.done_channels)?;
                data.insert(
                    "webhook_id".to_string(),
                    Value::String(state.webhook_id.clone()),
                );
                data.insert(
                    "webhook_token".to_string(),
                    Value::String(state.webhook_token.clone()),
                );
                data.insert(
                    "restoredChannelsMap".to_string(),
                    serde_json::to_value(&state.restored_channels_map)
                        .map_err(|err| JobError::internal(err.to_string()))?,
                );
                save_intermediate(progress, current, data).await?;

                total_messages += 1;
                env.sleep(self.constraints.restore.send_message_sleep)
                    .await?;
            }
        }

        Ok(StepOutcome::Continue)
    }
}
