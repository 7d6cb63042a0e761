// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Thin HTTP client for the chat platform's REST API. Deliberately minimal:
//! the interesting behaviour lives behind [`PlatformPort`], this adapter just
//! shapes requests and surfaces failures as platform errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::app::errors::{JobError, JobResult};
use crate::app::ports::PlatformPort;
use crate::app::types::{
    Channel, ChannelCreate, Download, Guild, GuildEdit, Member, Message, Role, RoleCreate, User,
    Webhook, WebhookPayload,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpPlatform {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl HttpPlatform {
    pub fn new(api_base: String, token: String) -> JobResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| JobError::internal(format!("failed to build http client: {err}")))?;
        Ok(HttpPlatform {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bot {}", self.token))
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> JobResult<reqwest::Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|err| JobError::platform(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::platform(format!("status {status}: {body}")));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> JobResult<T> {
        let response = self.send(self.http.get(self.url(path))).await?;
        response
            .json()
            .await
            .map_err(|err| JobError::platform(format!("invalid response body: {err}")))
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> JobResult<T> {
        let response = self.send(self.http.post(self.url(path)).json(body)).await?;
        response
            .json()
            .await
            .map_err(|err| JobError::platform(format!("invalid response body: {err}")))
    }

    async fn post_no_content(&self, path: &str, body: &Value) -> JobResult<()> {
        self.send(self.http.post(self.url(path)).json(body)).await?;
        Ok(())
    }

    async fn patch_no_content(&self, path: &str, body: &Value) -> JobResult<()> {
        self.send(self.http.patch(self.url(path)).json(body)).await?;
        Ok(())
    }

    async fn delete_no_content(&self, path: &str) -> JobResult<()> {
        self.send(self.http.delete(self.url(path))).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformPort for HttpPlatform {
    async fn current_user(&self) -> JobResult<User> {
        self.get_json("/users/@me").await
    }

    async fn guild(&self, guild_id: &str) -> JobResult<Guild> {
        self.get_json(&format!("/guilds/{guild_id}")).await
    }

    async fn guild_member(&self, guild_id: &str, user_id: &str) -> JobResult<Member> {
        self.get_json(&format!("/guilds/{guild_id}/members/{user_id}"))
            .await
    }

    async fn guild_roles(&self, guild_id: &str) -> JobResult<Vec<Role>> {
        self.get_json(&format!("/guilds/{guild_id}/roles")).await
    }

    async fn guild_channels(&self, guild_id: &str) -> JobResult<Vec<Channel>> {
        self.get_json(&format!("/guilds/{guild_id}/channels")).await
    }

    async fn guild_stickers(&self, guild_id: &str) -> JobResult<Vec<Value>> {
        self.get_json(&format!("/guilds/{guild_id}/stickers")).await
    }

    async fn edit_guild(&self, guild_id: &str, edit: &GuildEdit) -> JobResult<()> {
        let body = serde_json::to_value(edit)
            .map_err(|err| JobError::internal(err.to_string()))?;
        self.patch_no_content(&format!("/guilds/{guild_id}"), &body)
            .await
    }

    async fn create_role(&self, guild_id: &str, role: &RoleCreate) -> JobResult<Role> {
        let body = serde_json::to_value(role)
            .map_err(|err| JobError::internal(err.to_string()))?;
        self.post_json(&format!("/guilds/{guild_id}/roles"), &body)
            .await
    }

    async fn delete_role(&self, guild_id: &str, role_id: &str) -> JobResult<()> {
        self.delete_no_content(&format!("/guilds/{guild_id}/roles/{role_id}"))
            .await
    }

    async fn create_channel(&self, guild_id: &str, channel: &ChannelCreate) -> JobResult<Channel> {
        let body = serde_json::to_value(channel)
            .map_err(|err| JobError::internal(err.to_string()))?;
        self.post_json(&format!("/guilds/{guild_id}/channels"), &body)
            .await
    }

    async fn delete_channel(&self, channel_id: &str) -> JobResult<()> {
        self.delete_no_content(&format!("/channels/{channel_id}"))
            .await
    }

    async fn channel_messages(
        &self,
        channel_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> JobResult<Vec<Message>> {
        let mut path = format!("/channels/{channel_id}/messages?limit={limit}");
        if let Some(before) = before {
            path.push_str(&format!("&before={before}"));
        }
        self.get_json(&path).await
    }

    async fn bulk_delete_messages(&self, channel_id: &str, message_ids: &[String]) -> JobResult<()> {
        self.post_no_content(
            &format!("/channels/{channel_id}/messages/bulk-delete"),
            &json!({ "messages": message_ids }),
        )
        .await
    }

    async fn create_webhook(&self, channel_id: &str, name: &str) -> JobResult<Webhook> {
        self.post_json(
            &format!("/channels/{channel_id}/webhooks"),
            &json!({ "name": name }),
        )
        .await
    }

    async fn edit_webhook_channel(
        &self,
        webhook_id: &str,
        name: &str,
        channel_id: &str,
    ) -> JobResult<()> {
        self.patch_no_content(
            &format!("/webhooks/{webhook_id}"),
            &json!({ "name": name, "channel_id": channel_id }),
        )
        .await
    }

    async fn delete_webhook(&self, webhook_id: &str, token: &str) -> JobResult<()> {
        self.delete_no_content(&format!("/webhooks/{webhook_id}/{token}"))
            .await
    }

    async fn execute_webhook(
        &self,
        webhook_id: &str,
        token: &str,
        payload: &WebhookPayload,
    ) -> JobResult<()> {
        let body = json!({
            "content": payload.content,
            "username": payload.username,
            "avatar_url": payload.avatar_url,
            "embeds": payload.embeds,
            "components": payload.components,
            "tts": payload.tts,
        });
        let path = format!("/webhooks/{webhook_id}/{token}");

        if payload.files.is_empty() {
            return self.post_no_content(&path, &body).await;
        }

        let mut form = reqwest::multipart::Form::new().text(
            "payload_json",
            serde_json::to_string(&body).map_err(|err| JobError::internal(err.to_string()))?,
        );
        for (index, file) in payload.files.iter().enumerate() {
            let part = reqwest::multipart::Part::bytes(file.data.clone())
                .file_name(file.name.clone())
                .mime_str(&file.content_type)
                .map_err(|err| JobError::internal(format!("bad attachment mime type: {err}")))?;
            form = form.part(format!("files[{index}]"), part);
        }
        self.send(self.http.post(self.url(&path)).multipart(form))
            .await?;
        Ok(())
    }

    async fn download(&self, url: &str, max_bytes: u64, timeout: Duration) -> JobResult<Download> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| JobError::platform(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(JobError::platform(format!("status {status}")));
        }
        if let Some(length) = response.content_length() {
            if length > max_bytes {
                return Err(JobError::format(format!(
                    "payload too large, expected less than {max_bytes} bytes, got {length} bytes"
                )));
            }
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|err| JobError::platform(err.to_string()))?;
        if bytes.len() as u64 > max_bytes {
            return Err(JobError::format(format!(
                "payload too large, expected less than {max_bytes} bytes, got {} bytes",
                bytes.len()
            )));
        }
        Ok(Download {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
