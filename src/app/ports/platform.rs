// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::app::errors::JobResult;
use crate::app::types::{
    Channel, ChannelCreate, Download, Guild, GuildEdit, Member, Message, Role, RoleCreate, User,
    Webhook, WebhookPayload,
};

/// The chat platform, seen through the operations the jobs need. The HTTP
/// client behind this is deliberately opaque.
#[async_trait]
pub trait PlatformPort: Send + Sync {
    async fn current_user(&self) -> JobResult<User>;
    async fn guild(&self, guild_id: &str) -> JobResult<Guild>;
    async fn guild_member(&self, guild_id: &str, user_id: &str) -> JobResult<Member>;
    async fn guild_roles(&self, guild_id: &str) -> JobResult<Vec<Role>>;
    async fn guild_channels(&self, guild_id: &str) -> JobResult<Vec<Channel>>;
    async fn guild_stickers(&self, guild_id: &str) -> JobResult<Vec<Value>>;
    async fn edit_guild(&self, guild_id: &str, edit: &GuildEdit) -> JobResult<()>;

    async fn create_role(&self, guild_id: &str, role: &RoleCreate) -> JobResult<Role>;
    async fn delete_role(&self, guild_id: &str, role_id: &str) -> JobResult<()>;

    async fn create_channel(&self, guild_id: &str, channel: &ChannelCreate) -> JobResult<Channel>;
    async fn delete_channel(&self, channel_id: &str) -> JobResult<()>;

    /// Newest-first page of up to `limit` messages, optionally before the
    /// given message id.
    async fn channel_messages(
        &self,
        channel_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> JobResult<Vec<Message>>;
    async fn bulk_delete_messages(&self, channel_id: &str, message_ids: &[String]) -> JobResult<()>;

    async fn create_webhook(&self, channel_id: &str, name: &str) -> JobResult<Webhook>;
    async fn edit_webhook_channel(
        &self,
        webhook_id: &str,
        name: &str,
        channel_id: &str,
    ) -> JobResult<()>;
    async fn delete_webhook(&self, webhook_id: &str, token: &str) -> JobResult<()>;
    async fn execute_webhook(
        &self,
        webhook_id: &str,
        token: &str,
        payload: &WebhookPayload,
    ) -> JobResult<()>;

    /// Bounded download of an arbitrary URL (guild assets, backup payloads).
    async fn download(&self, url: &str, max_bytes: u64, timeout: Duration) -> JobResult<Download>;
}
