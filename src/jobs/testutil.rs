// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-memory fakes shared by the job and stepper tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::watch;

use crate::app::concurrency::ConcurrencyRegistry;
use crate::app::errors::{JobError, JobResult};
use crate::app::ports::{ClockPort, ObjectStoragePort, PlatformPort, ProgressStorePort};
use crate::app::types::{
    Channel, ChannelCreate, ChannelType, Download, Guild, GuildEdit, Member, Message,
    PermissionOverwrite, Progress, Role, RoleCreate, User, Webhook, WebhookPayload,
};
use crate::jobs::{JobEnv, OperationMode, ProgressHandle};

pub(crate) const TEST_NOW: OffsetDateTime = datetime!(2026-03-01 12:00:00 UTC);

pub(crate) struct InMemoryProgressStore {
    inner: Mutex<HashMap<String, Progress>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        InMemoryProgressStore {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn seed(&self, job_id: &str, progress: Progress) {
        self.inner
            .lock()
            .unwrap()
            .insert(job_id.to_string(), progress);
    }

    pub fn snapshot(&self, job_id: &str) -> Option<Progress> {
        self.inner.lock().unwrap().get(job_id).cloned()
    }
}

#[async_trait]
impl ProgressStorePort for InMemoryProgressStore {
    async fn get(&self, job_id: &str) -> JobResult<Option<Progress>> {
        Ok(self.inner.lock().unwrap().get(job_id).cloned())
    }

    async fn set(&self, job_id: &str, progress: &Progress) -> JobResult<()> {
        self.inner
            .lock()
            .unwrap()
            .insert(job_id.to_string(), progress.clone());
        Ok(())
    }
}

pub(crate) struct FakeStorage {
    pub objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl FakeStorage {
    pub fn new() -> Self {
        FakeStorage {
            objects: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ObjectStoragePort for FakeStorage {
    async fn save(&self, bucket: &str, dir: &str, filename: &str, data: &[u8]) -> JobResult<()> {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), format!("{dir}/{filename}")),
            data.to_vec(),
        );
        Ok(())
    }

    async fn read(&self, bucket: &str, path: &str) -> JobResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| JobError::platform(format!("object {bucket}/{path} not found")))
    }
}

pub(crate) struct FixedClock(pub OffsetDateTime);

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.0
    }
}

/// Programmable platform double: state mutates the way the real platform
/// would (created roles land in the guild with fresh ids), and every write is
/// recorded for assertions.
pub(crate) struct FakePlatform {
    pub guild: Mutex<Guild>,
    pub member: Mutex<Member>,
    pub stickers: Mutex<Vec<Value>>,
    /// channel id -> newest-first message list
    pub messages: Mutex<HashMap<String, Vec<Message>>>,
    pub downloads: Mutex<HashMap<String, Download>>,

    pub guild_edits: Mutex<Vec<GuildEdit>>,
    pub created_roles: Mutex<Vec<Role>>,
    pub deleted_roles: Mutex<Vec<String>>,
    pub created_channels: Mutex<Vec<Channel>>,
    pub deleted_channels: Mutex<Vec<String>>,
    pub bulk_deletes: Mutex<Vec<(String, Vec<String>)>>,
    pub executed_webhooks: Mutex<Vec<(String, WebhookPayload)>>,
    pub webhook_channel: Mutex<String>,
    pub deleted_webhooks: Mutex<Vec<String>>,

    pub fail_messages_for: Mutex<HashSet<String>>,
    pub fail_webhook_create: AtomicBool,
    next_id: AtomicU64,
}

impl FakePlatform {
    pub fn new(guild: Guild, member: Member) -> Self {
        FakePlatform {
            guild: Mutex::new(guild),
            member: Mutex::new(member),
            stickers: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
            guild_edits: Mutex::new(Vec::new()),
            created_roles: Mutex::new(Vec::new()),
            deleted_roles: Mutex::new(Vec::new()),
            created_channels: Mutex::new(Vec::new()),
            deleted_channels: Mutex::new(Vec::new()),
            bulk_deletes: Mutex::new(Vec::new()),
            executed_webhooks: Mutex::new(Vec::new()),
            webhook_channel: Mutex::new(String::new()),
            deleted_webhooks: Mutex::new(Vec::new()),
            fail_messages_for: Mutex::new(HashSet::new()),
            fail_webhook_create: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn put_messages(&self, channel_id: &str, messages: Vec<Message>) {
        self.messages
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), messages);
    }

    fn fresh_id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PlatformPort for FakePlatform {
    async fn current_user(&self) -> JobResult<User> {
        Ok(self.member.lock().unwrap().user.clone())
    }

    async fn guild(&self, _guild_id: &str) -> JobResult<Guild> {
        Ok(self.guild.lock().unwrap().clone())
    }

    async fn guild_member(&self, _guild_id: &str, _user_id: &str) -> JobResult<Member> {
        Ok(self.member.lock().unwrap().clone())
    }

    async fn guild_roles(&self, _guild_id: &str) -> JobResult<Vec<Role>> {
        Ok(self.guild.lock().unwrap().roles.clone())
    }

    async fn guild_channels(&self, _guild_id: &str) -> JobResult<Vec<Channel>> {
        Ok(self.guild.lock().unwrap().channels.clone())
    }

    async fn guild_stickers(&self, _guild_id: &str) -> JobResult<Vec<Value>> {
        Ok(self.stickers.lock().unwrap().clone())
    }

    async fn edit_guild(&self, _guild_id: &str, edit: &GuildEdit) -> JobResult<()> {
        self.guild_edits.lock().unwrap().push(edit.clone());
        Ok(())
    }

    async fn create_role(&self, _guild_id: &str, role: &RoleCreate) -> JobResult<Role> {
        let mut guild = self.guild.lock().unwrap();
        let created = Role {
            id: self.fresh_id("newrole"),
            name: role.name.clone(),
            color: role.color.unwrap_or(0),
            hoist: role.hoist,
            position: guild.roles.len() as i64,
            permissions: role.permissions,
            managed: false,
            mentionable: role.mentionable,
        };
        guild.roles.push(created.clone());
        self.created_roles.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn delete_role(&self, _guild_id: &str, role_id: &str) -> JobResult<()> {
        let mut guild = self.guild.lock().unwrap();
        guild.roles.retain(|role| role.id != role_id);
        self.deleted_roles.lock().unwrap().push(role_id.to_string());
        Ok(())
    }

    async fn create_channel(&self, _guild_id: &str, channel: &ChannelCreate) -> JobResult<Channel> {
        let mut guild = self.guild.lock().unwrap();
        let created = Channel {
            id: self.fresh_id("newchan"),
            kind: channel.kind,
            name: channel.name.clone(),
            topic: channel.topic.clone(),
            position: channel.position,
            parent_id: channel.parent_id.clone(),
            nsfw: channel.nsfw,
            bitrate: channel.bitrate,
            user_limit: channel.user_limit,
            rate_limit_per_user: channel.rate_limit_per_user,
            permission_overwrites: channel.permission_overwrites.clone(),
        };
        guild.channels.push(created.clone());
        self.created_channels.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn delete_channel(&self, channel_id: &str) -> JobResult<()> {
        let mut guild = self.guild.lock().unwrap();
        guild.channels.retain(|channel| channel.id != channel_id);
        self.deleted_channels
            .lock()
            .unwrap()
            .push(channel_id.to_string());
        Ok(())
    }

    async fn channel_messages(
        &self,
        channel_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> JobResult<Vec<Message>> {
        if self.fail_messages_for.lock().unwrap().contains(channel_id) {
            return Err(JobError::platform(format!(
                "channel {channel_id} unavailable"
            )));
        }
        let messages = self.messages.lock().unwrap();
        let all = messages.get(channel_id).cloned().unwrap_or_default();
        let start = match before {
            Some(id) => all
                .iter()
                .position(|message| message.id == id)
                .map(|position| position + 1)
                .unwrap_or(all.len()),
            None => 0,
        };
        Ok(all
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .collect())
    }

    async fn bulk_delete_messages(
        &self,
        channel_id: &str,
        message_ids: &[String],
    ) -> JobResult<()> {
        let mut messages = self.messages.lock().unwrap();
        if let Some(list) = messages.get_mut(channel_id) {
            list.retain(|message| !message_ids.contains(&message.id));
        }
        self.bulk_deletes
            .lock()
            .unwrap()
            .push((channel_id.to_string(), message_ids.to_vec()));
        Ok(())
    }

    async fn create_webhook(&self, channel_id: &str, _name: &str) -> JobResult<Webhook> {
        if self.fail_webhook_create.load(Ordering::SeqCst) {
            return Err(JobError::platform("webhook creation refused"));
        }
        *self.webhook_channel.lock().unwrap() = channel_id.to_string();
        Ok(Webhook {
            id: "wh1".to_string(),
            token: "wh-token".to_string(),
            channel_id: channel_id.to_string(),
        })
    }

    async fn edit_webhook_channel(
        &self,
        _webhook_id: &str,
        _name: &str,
        channel_id: &str,
    ) -> JobResult<()> {
        *self.webhook_channel.lock().unwrap() = channel_id.to_string();
        Ok(())
    }

    async fn delete_webhook(&self, webhook_id: &str, _token: &str) -> JobResult<()> {
        self.deleted_webhooks
            .lock()
            .unwrap()
            .push(webhook_id.to_string());
        Ok(())
    }

    async fn execute_webhook(
        &self,
        _webhook_id: &str,
        _token: &str,
        payload: &WebhookPayload,
    ) -> JobResult<()> {
        let channel = self.webhook_channel.lock().unwrap().clone();
        self.executed_webhooks
            .lock()
            .unwrap()
            .push((channel, payload.clone()));
        Ok(())
    }

    async fn download(
        &self,
        url: &str,
        max_bytes: u64,
        _timeout: Duration,
    ) -> JobResult<Download> {
        let downloads = self.downloads.lock().unwrap();
        let found = downloads
            .get(url)
            .cloned()
            .ok_or_else(|| JobError::platform(format!("no fixture for {url}")))?;
        if found.bytes.len() as u64 > max_bytes {
            return Err(JobError::format("payload too large"));
        }
        Ok(found)
    }
}

// Model builders.

pub(crate) fn bot_user() -> User {
    User {
        id: "bot".into(),
        username: "job-runner".into(),
        avatar: None,
        bot: true,
    }
}

pub(crate) fn member_with_roles(roles: &[&str]) -> Member {
    Member {
        user: bot_user(),
        roles: roles.iter().map(|role| role.to_string()).collect(),
    }
}

pub(crate) fn role(id: &str, name: &str, position: i64, permissions: u64) -> Role {
    Role {
        id: id.into(),
        name: name.into(),
        color: 0,
        hoist: false,
        position,
        permissions,
        managed: false,
        mentionable: false,
    }
}

pub(crate) fn text_channel(id: &str, name: &str) -> Channel {
    Channel {
        id: id.into(),
        kind: ChannelType::Text,
        name: name.into(),
        topic: String::new(),
        position: 0,
        parent_id: String::new(),
        nsfw: false,
        bitrate: 0,
        user_limit: 0,
        rate_limit_per_user: 0,
        permission_overwrites: Vec::new(),
    }
}

pub(crate) fn category_channel(id: &str, name: &str) -> Channel {
    let mut channel = text_channel(id, name);
    channel.kind = ChannelType::Category;
    channel
}

pub(crate) fn overwrite(id: &str, allow: u64, deny: u64) -> PermissionOverwrite {
    PermissionOverwrite {
        id: id.into(),
        kind: crate::app::types::OverwriteKind::Role,
        allow,
        deny,
    }
}

pub(crate) fn empty_guild(id: &str) -> Guild {
    Guild {
        id: id.into(),
        name: format!("guild-{id}"),
        description: String::new(),
        icon: String::new(),
        banner: String::new(),
        splash: String::new(),
        owner_id: "owner".into(),
        features: vec![],
        afk_timeout: 300,
        verification_level: 0,
        default_message_notifications: 0,
        explicit_content_filter: 0,
        rules_channel_id: String::new(),
        public_updates_channel_id: String::new(),
        roles: vec![],
        channels: vec![],
        stickers: vec![],
    }
}

pub(crate) fn message(id: &str, author: &User, content: &str, timestamp: OffsetDateTime) -> Message {
    Message {
        id: id.into(),
        channel_id: String::new(),
        content: content.into(),
        author: author.clone(),
        timestamp,
        tts: false,
        embeds: vec![],
        components: vec![],
        attachments: vec![],
    }
}

// Environment builders.

pub(crate) struct TestWorld {
    pub platform: Arc<FakePlatform>,
    pub storage: Arc<FakeStorage>,
    pub progress: Arc<InMemoryProgressStore>,
    pub cancel: watch::Sender<bool>,
    pub env: JobEnv,
    pub handle: ProgressHandle,
}

pub(crate) fn world_with(platform: FakePlatform) -> TestWorld {
    world_at(platform, TEST_NOW)
}

pub(crate) fn world_at(platform: FakePlatform, now: OffsetDateTime) -> TestWorld {
    let platform = Arc::new(platform);
    let storage = Arc::new(FakeStorage::new());
    let progress = Arc::new(InMemoryProgressStore::new());
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let env = JobEnv::new(
        "G".to_string(),
        bot_user(),
        OperationMode::Jobs,
        platform.clone(),
        storage.clone(),
        Arc::new(FixedClock(now)),
        ConcurrencyRegistry::new(),
        cancel_rx,
    );
    let handle = ProgressHandle::new("job-1".to_string(), progress.clone());
    TestWorld {
        platform,
        storage,
        progress,
        cancel: cancel_tx,
        env,
        handle,
    }
}

pub(crate) fn test_env() -> JobEnv {
    let world = world_with(FakePlatform::new(empty_guild("G"), member_with_roles(&[])));
    std::mem::forget(world.cancel);
    world.env
}

pub(crate) fn cancellable_env() -> (JobEnv, watch::Sender<bool>) {
    let world = world_with(FakePlatform::new(empty_guild("G"), member_with_roles(&[])));
    (world.env, world.cancel)
}

pub(crate) fn test_progress_handle(job_id: &str) -> (ProgressHandle, Arc<InMemoryProgressStore>) {
    let store = Arc::new(InMemoryProgressStore::new());
    (
        ProgressHandle::new(job_id.to_string(), store.clone()),
        store,
    )
}
