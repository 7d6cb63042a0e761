// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::app::alloc::{
    OrderedMap, channel_allocation_stream, channels_from_list, create_channel_allocations,
};
use crate::app::errors::{JobError, JobResult};
use crate::app::perms::{base_permissions, has_permission, permissions};
use crate::app::types::{ChannelType, Message, Output};
use crate::jobs::{JobEnv, JobImpl, OperationMode, PresetInfo, ProgressHandle};

pub const JOB_NAME: &str = "message_prune";

/// Category key under which moderation jobs share a per-guild concurrency
/// budget.
pub const MODERATION_CONCURRENCY_CATEGORY: &str = "moderation";

/// The platform's bulk-delete endpoint only accepts messages younger than two
/// weeks; `prune_from` is clamped to that window.
const MAX_PRUNE_WINDOW: Duration = Duration::from_secs(14 * 24 * 60 * 60);

const ALLOWED_CHANNEL_TYPES: &[ChannelType] = &[
    ChannelType::Text,
    ChannelType::News,
    ChannelType::NewsThread,
    ChannelType::PublicThread,
    ChannelType::PrivateThread,
    ChannelType::Forum,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePruneConstraints {
    pub total_max_messages: u64,
    pub min_per_channel: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationConstraints {
    pub message_prune: MessagePruneConstraints,
    /// How many moderation jobs can run concurrently per guild
    pub max_server_moderation: u32,
}

pub fn free_plan_moderation_constraints() -> ModerationConstraints {
    ModerationConstraints {
        message_prune: MessagePruneConstraints {
            total_max_messages: 1000,
            min_per_channel: 10,
        },
        max_server_moderation: 1,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagePruneOpts {
    /// If set, the channels to prune messages from
    pub channels: Vec<String>,
    /// The number of messages per channel
    pub per_channel: u64,
    /// The maximum number of messages to prune in total
    pub max_messages: u64,
    /// If set, only messages authored by this user are pruned
    pub user_id: String,
    /// How far back to prune; zero means the full two-week window
    pub prune_from: Duration,
    pub rollover_leftovers: bool,
    pub special_allocations: HashMap<String, u64>,
}

/// A job to bulk-delete recent messages across a guild's channels, filtered
/// by time window and optionally by author.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagePrune {
    /// Auto-set from the plan on the server; required for local runs.
    pub constraints: Option<ModerationConstraints>,
    pub options: MessagePruneOpts,
}

impl MessagePrune {
    pub fn from_spawn_data(data: Value) -> JobResult<Box<dyn JobImpl>> {
        Ok(Box::new(
            crate::jobs::options_from_spawn_data::<MessagePrune>(data)?,
        ))
    }

    fn constraints(&self) -> JobResult<&ModerationConstraints> {
        self.constraints
            .as_ref()
            .ok_or_else(|| JobError::internal("moderation constraints not initialised"))
    }
}

#[async_trait]
impl JobImpl for MessagePrune {
    fn name(&self) -> &'static str {
        JOB_NAME
    }

    fn fields(&self) -> Value {
        json!({
            "constraints": self.constraints,
            "options": self.options,
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
        match env.mode {
            OperationMode::Jobs => {
                self.constraints = Some(free_plan_moderation_constraints());
            }
            OperationMode::LocalJobs => {
                if self.constraints.is_none() {
                    return Err(JobError::validation("constraints are required"));
                }
            }
        }
        let constraints = self.constraints()?.clone();

        if self.options.prune_from.is_zero() || self.options.prune_from > MAX_PRUNE_WINDOW {
            self.options.prune_from = MAX_PRUNE_WINDOW;
        }
        if self.options.max_messages == 0 {
            self.options.max_messages = constraints.message_prune.total_max_messages;
        }

        if self.options.per_channel < constraints.message_prune.min_per_channel {
            return Err(JobError::validation(format!(
                "per_channel cannot be less than {}",
                constraints.message_prune.min_per_channel
            )));
        }
        if self.options.max_messages > constraints.message_prune.total_max_messages {
            return Err(JobError::validation(format!(
                "max_messages cannot be greater than {}",
                constraints.message_prune.total_max_messages
            )));
        }
        if self.options.per_channel > self.options.max_messages {
            return Err(JobError::validation(
                "per_channel cannot be greater than max_messages",
            ));
        }

        if env
            .concurrency
            .count(MODERATION_CONCURRENCY_CATEGORY, &env.guild_id)
            >= constraints.max_server_moderation
        {
            return Err(JobError::ConcurrencyExceeded {
                category: MODERATION_CONCURRENCY_CATEGORY,
                limit: constraints.max_server_moderation,
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
                MODERATION_CONCURRENCY_CATEGORY,
                &env.guild_id,
                constraints.max_server_moderation,
            )
            .ok_or(JobError::ConcurrencyExceeded {
                category: MODERATION_CONCURRENCY_CATEGORY,
                limit: constraints.max_server_moderation,
            })?;

        tracing::info!("fetching bot member state in guild");
        let member = env
            .platform
            .guild_member(&env.guild_id, &env.bot_user.id)
            .await?;

        let mut guild = env.platform.guild(&env.guild_id).await?;
        if guild.roles.is_empty() {
            guild.roles = env.platform.guild_roles(&env.guild_id).await?;
        }
        if guild.channels.is_empty() {
            guild.channels = env.platform.guild_channels(&env.guild_id).await?;
        }

        let base_perms = base_permissions(&guild, &member);
        if !has_permission(base_perms, permissions::MANAGE_MESSAGES)
            && !has_permission(base_perms, permissions::ADMINISTRATOR)
        {
            return Err(JobError::validation(
                "bot does not have 'Manage Messages' permissions",
            ));
        }

        let allocations = create_channel_allocations(
            base_perms,
            &guild,
            &member,
            &[
                permissions::VIEW_CHANNEL,
                permissions::READ_MESSAGE_HISTORY,
                permissions::MANAGE_MESSAGES,
            ],
            ALLOWED_CHANNEL_TYPES,
            &channels_from_list(&guild, &self.options.channels),
            &self.options.special_allocations,
            self.options.per_channel,
            self.options.max_messages,
        )
        .map_err(|err| JobError::validation(err.to_string()))?;

        tracing::info!(channels = allocations.len(), "created channel allocations");

        let cutoff = env.clock.now_utc() - self.options.prune_from;
        let mut pruned: OrderedMap<Vec<Message>> = OrderedMap::new();
        let rollover_base = if self.options.rollover_leftovers {
            self.options.per_channel
        } else {
            0
        };

        channel_allocation_stream(
            &allocations,
            |channel_id, allocation| {
                let pruned = &mut pruned;
                async move {
                let mut channel_pruned: Vec<Message> = Vec::new();
                let mut before: Option<String> = None;

                loop {
                    env.ensure_active()?;
                    if channel_pruned.len() as u64 >= allocation {
                        break;
                    }

                    let limit = (allocation - channel_pruned.len() as u64).min(100) as u32;
                    tracing::info!(channel_id, limit, before = ?before, "fetching messages");
                    let page = env
                        .platform
                        .channel_messages(channel_id, limit, before.as_deref())
                        .await
                        .map_err(|err| {
                            JobError::platform(format!("error fetching messages: {err}"))
                        })?;
                    if page.is_empty() {
                        break;
                    }

                    let mut delete_ids: Vec<String> = Vec::new();
                    for message in &page {
                        if message.timestamp < cutoff {
                            continue;
                        }
                        if !self.options.user_id.is_empty()
                            && message.author.id != self.options.user_id
                        {
                            continue;
                        }
                        delete_ids.push(message.id.clone());
                    }

                    if !delete_ids.is_empty() {
                        env.platform
                            .bulk_delete_messages(channel_id, &delete_ids)
                            .await
                            .map_err(|err| {
                                JobError::platform(format!(
                                    "error bulk deleting messages: {err}"
                                ))
                            })?;
                        channel_pruned.extend(
                            page.iter()
                                .filter(|message| delete_ids.contains(&message.id))
                                .cloned(),
                        );
                    }

                    // Pages are newest-first; once the oldest message of a
                    // page predates the cutoff, older pages cannot match.
                    let page_len = page.len();
                    let oldest = page.last().map(|message| (message.id.clone(), message.timestamp));
                    if let Some((id, timestamp)) = oldest {
                        if timestamp < cutoff {
                            break;
                        }
                        before = Some(id);
                    }
                    if page_len < limit as usize {
                        break;
                    }
                }

                let collected = channel_pruned.len() as u64;
                pruned.insert(channel_id.to_string(), channel_pruned);
                Ok(collected)
                }
            },
            self.options.max_messages,
            rollover_base,
        )
        .await?;

        let data = serde_json::to_vec(&pruned)
            .map_err(|err| JobError::internal(format!("error encoding final messages: {err}")))?;
        Ok(Some(Output {
            filename: "pruned-messages.txt".to_string(),
            data,
        }))
    }

    fn local_presets(&self) -> PresetInfo {
        PresetInfo {
            runnable: true,
            preset: json!({
                "constraints": free_plan_moderation_constraints(),
                "options": MessagePruneOpts {
                    per_channel: 100,
                    ..MessagePruneOpts::default()
                },
            }),
            comments: HashMap::from([
                (
                    "constraints.max_server_moderation",
                    "Only 1 mod job should be running at any given time locally",
                ),
                (
                    "constraints.message_prune.total_max_messages",
                    "We can be more generous here with 1000 by default",
                ),
                (
                    "constraints.message_prune.min_per_channel",
                    "We can be more generous here with 10 by default",
                ),
            ]),
        }
    }
}
