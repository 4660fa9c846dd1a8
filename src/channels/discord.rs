use super::traits::{
    Actor, Button, ButtonStyle, Channel, GuildRef, GuildRole, InboundEvent, InboundMessage,
    Interaction, InteractionReply, MemberRef, MessageRef, OutboundMessage, RichCard,
};
use crate::security::PermissionSet;
use crate::util::truncate_with_ellipsis;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const DISCORD_API: &str = "https://discord.com/api/v10";

/// GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 1 | (1 << 1) | (1 << 9) | (1 << 15);

const PERM_ADMINISTRATOR: u64 = 1 << 3;
const PERM_MANAGE_GUILD: u64 = 1 << 5;
const PERM_MANAGE_MESSAGES: u64 = 1 << 13;

/// Interaction callback type CHANNEL_MESSAGE_WITH_SOURCE.
const CALLBACK_CHANNEL_MESSAGE: u64 = 4;
const FLAG_EPHEMERAL: u64 = 1 << 6;
/// MESSAGE_COMPONENT interactions (button clicks).
const INTERACTION_COMPONENT: u64 = 3;
const BUTTONS_PER_ROW: usize = 5;

#[derive(Debug, Clone)]
struct CachedRole {
    name: String,
    permissions: u64,
}

#[derive(Debug, Clone, Default)]
struct GuildCache {
    name: String,
    owner_id: u64,
    roles: HashMap<u64, CachedRole>,
}

/// Discord channel: connects via Gateway WebSocket for real-time events and
/// uses the REST API for everything outbound.
pub struct DiscordChannel {
    bot_token: String,
    guild_id: Option<u64>,
    api_base: String,
    client: reqwest::Client,
    bot_user_id: AtomicU64,
    guilds: RwLock<HashMap<u64, GuildCache>>,
    shutdown: CancellationToken,
}

impl DiscordChannel {
    pub fn new(bot_token: String, guild_id: Option<u64>) -> Self {
        Self {
            bot_token,
            guild_id,
            api_base: DISCORD_API.to_string(),
            client: reqwest::Client::new(),
            bot_user_id: AtomicU64::new(0),
            guilds: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Point REST calls somewhere else (tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    fn guild_allowed(&self, guild_id: Option<u64>) -> bool {
        match (self.guild_id, guild_id) {
            (Some(wanted), Some(got)) => wanted == got,
            _ => true,
        }
    }

    fn guild_ref(&self, guild_id: u64) -> GuildRef {
        let name = self
            .guilds
            .read()
            .get(&guild_id)
            .map(|g| g.name.clone())
            .unwrap_or_default();
        GuildRef { id: guild_id, name }
    }

    /// Role names and effective permissions of a member, from the role cache.
    fn resolve_member(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &[u64],
    ) -> (Vec<String>, PermissionSet) {
        let guilds = self.guilds.read();
        let Some(guild) = guilds.get(&guild_id) else {
            return (Vec::new(), PermissionSet::default());
        };

        // @everyone shares the guild's id.
        let mut bits = guild.roles.get(&guild_id).map_or(0, |r| r.permissions);
        let mut names = Vec::with_capacity(role_ids.len());
        for id in role_ids {
            if let Some(role) = guild.roles.get(id) {
                bits |= role.permissions;
                names.push(role.name.clone());
            }
        }

        let permissions = if guild.owner_id == user_id {
            PermissionSet::ALL
        } else {
            permission_set(bits)
        };
        (names, permissions)
    }

    fn role_names(&self, guild_id: u64, role_ids: &[u64]) -> Vec<String> {
        let guilds = self.guilds.read();
        guilds.get(&guild_id).map_or_else(Vec::new, |g| {
            role_ids
                .iter()
                .filter_map(|id| g.roles.get(id).map(|r| r.name.clone()))
                .collect()
        })
    }

    fn cache_guild(&self, d: &Value) {
        let Some(id) = d.get("id").and_then(snowflake) else {
            return;
        };
        let mut roles = HashMap::new();
        if let Some(list) = d.get("roles").and_then(Value::as_array) {
            for role in list {
                if let Some((role_id, cached)) = parse_role(role) {
                    roles.insert(role_id, cached);
                }
            }
        }
        let entry = GuildCache {
            name: str_field(d, "name").to_string(),
            owner_id: d.get("owner_id").and_then(snowflake).unwrap_or(0),
            roles,
        };
        self.guilds.write().insert(id, entry);
    }

    /// Update caches from a dispatch payload and translate it into an inbound
    /// event when the bot cares about it.
    fn handle_dispatch(&self, event_type: &str, d: &Value) -> Option<InboundEvent> {
        match event_type {
            "READY" => {
                let user = d.get("user")?;
                if let Some(id) = user.get("id").and_then(snowflake) {
                    self.bot_user_id.store(id, Ordering::Relaxed);
                }
                Some(InboundEvent::Ready {
                    user_name: display_name(user),
                })
            }
            "GUILD_CREATE" | "GUILD_UPDATE" => {
                self.cache_guild(d);
                None
            }
            "GUILD_DELETE" => {
                if let Some(id) = d.get("id").and_then(snowflake) {
                    self.guilds.write().remove(&id);
                }
                None
            }
            "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
                let guild_id = d.get("guild_id").and_then(snowflake)?;
                let (role_id, role) = parse_role(d.get("role")?)?;
                if let Some(guild) = self.guilds.write().get_mut(&guild_id) {
                    guild.roles.insert(role_id, role);
                }
                None
            }
            "GUILD_ROLE_DELETE" => {
                let guild_id = d.get("guild_id").and_then(snowflake)?;
                let role_id = d.get("role_id").and_then(snowflake)?;
                if let Some(guild) = self.guilds.write().get_mut(&guild_id) {
                    guild.roles.remove(&role_id);
                }
                None
            }
            "MESSAGE_CREATE" => self.parse_message(d).map(InboundEvent::MessageReceived),
            "GUILD_MEMBER_ADD" | "GUILD_MEMBER_REMOVE" => {
                let guild_id = d.get("guild_id").and_then(snowflake)?;
                if !self.guild_allowed(Some(guild_id)) {
                    return None;
                }
                let user = d.get("user")?;
                let member = MemberRef {
                    id: user.get("id").and_then(snowflake)?,
                    name: display_name(user),
                };
                let guild = self.guild_ref(guild_id);
                Some(if event_type == "GUILD_MEMBER_ADD" {
                    InboundEvent::MemberJoined { member, guild }
                } else {
                    InboundEvent::MemberLeft { member, guild }
                })
            }
            "INTERACTION_CREATE" => self.parse_interaction(d).map(InboundEvent::ButtonClicked),
            _ => None,
        }
    }

    fn parse_message(&self, d: &Value) -> Option<InboundMessage> {
        let author = d.get("author")?;
        let author_id = author.get("id").and_then(snowflake)?;

        // Skip messages from the bot itself
        if author_id == self.bot_user_id.load(Ordering::Relaxed) {
            return None;
        }

        let guild_id = d.get("guild_id").and_then(snowflake);
        if !self.guild_allowed(guild_id) {
            return None;
        }

        let role_ids = snowflakes(d.get("member").and_then(|m| m.get("roles")));
        let (role_names, permissions) = guild_id.map_or_else(
            || (Vec::new(), PermissionSet::default()),
            |gid| self.resolve_member(gid, author_id, &role_ids),
        );

        Some(InboundMessage {
            id: d.get("id").and_then(snowflake)?,
            author: Actor {
                id: author_id,
                name: display_name(author),
                is_bot: author.get("bot").and_then(Value::as_bool).unwrap_or(false),
                role_names,
                permissions,
            },
            channel_id: d.get("channel_id").and_then(snowflake)?,
            guild: guild_id.map(|gid| self.guild_ref(gid)),
            content: str_field(d, "content").to_string(),
            reply_to: d
                .get("message_reference")
                .and_then(|r| r.get("message_id"))
                .and_then(snowflake),
            role_mentions: snowflakes(d.get("mention_roles")),
        })
    }

    fn parse_interaction(&self, d: &Value) -> Option<Interaction> {
        if d.get("type").and_then(Value::as_u64) != Some(INTERACTION_COMPONENT) {
            return None;
        }
        let guild_id = d.get("guild_id").and_then(snowflake);
        if !self.guild_allowed(guild_id) {
            return None;
        }

        let member = d.get("member");
        let user = member.and_then(|m| m.get("user")).or_else(|| d.get("user"))?;
        let user_id = user.get("id").and_then(snowflake)?;
        let role_ids = snowflakes(member.and_then(|m| m.get("roles")));
        // Interactions carry the member's resolved permissions.
        let bits = member
            .and_then(|m| m.get("permissions"))
            .and_then(snowflake)
            .unwrap_or(0);

        Some(Interaction {
            id: d.get("id").and_then(snowflake)?,
            application_id: d.get("application_id").and_then(snowflake)?,
            token: str_field(d, "token").to_string(),
            actor: Actor {
                id: user_id,
                name: display_name(user),
                is_bot: user.get("bot").and_then(Value::as_bool).unwrap_or(false),
                role_names: guild_id.map_or_else(Vec::new, |gid| self.role_names(gid, &role_ids)),
                permissions: permission_set(bits),
            },
            channel_id: d.get("channel_id").and_then(snowflake)?,
            guild: guild_id.map(|gid| self.guild_ref(gid)),
            custom_id: d
                .get("data")
                .map(|data| str_field(data, "custom_id"))
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn send_json(&self, method: reqwest::Method, url: &str, body: Option<&Value>) -> anyhow::Result<Option<Value>> {
        let mut req = self
            .client
            .request(method.clone(), url)
            .header("Authorization", self.auth_header());
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if method == reqwest::Method::DELETE && status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let err = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            anyhow::bail!("Discord {method} {url} failed ({status}): {err}");
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }
}

fn permission_set(bits: u64) -> PermissionSet {
    if bits & PERM_ADMINISTRATOR != 0 {
        return PermissionSet::ALL;
    }
    PermissionSet {
        manage_guild: bits & PERM_MANAGE_GUILD != 0,
        manage_messages: bits & PERM_MANAGE_MESSAGES != 0,
    }
}

/// Discord ids and permission bitfields arrive as decimal strings.
fn snowflake(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn snowflakes(value: Option<&Value>) -> Vec<u64> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(snowflake).collect())
        .unwrap_or_default()
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn display_name(user: &Value) -> String {
    user.get("global_name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| str_field(user, "username"))
        .to_string()
}

fn parse_role(role: &Value) -> Option<(u64, CachedRole)> {
    let id = role.get("id").and_then(snowflake)?;
    Some((
        id,
        CachedRole {
            name: str_field(role, "name").to_string(),
            permissions: role.get("permissions").and_then(snowflake).unwrap_or(0),
        },
    ))
}

/// Discord's embed limits, minus room for the ellipsis.
const EMBED_DESCRIPTION_MAX: usize = 4_093;
const EMBED_FIELD_VALUE_MAX: usize = 1_021;

fn embed_json(card: &RichCard) -> Value {
    let mut embed = json!({
        "title": card.title,
        "color": card.color,
    });
    if let Some(description) = &card.description {
        embed["description"] = json!(truncate_with_ellipsis(description, EMBED_DESCRIPTION_MAX));
    }
    if !card.fields.is_empty() {
        embed["fields"] = card
            .fields
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "value": truncate_with_ellipsis(&f.value, EMBED_FIELD_VALUE_MAX),
                    "inline": f.inline,
                })
            })
            .collect();
    }
    if let Some(footer) = &card.footer {
        embed["footer"] = json!({ "text": footer });
    }
    if let Some(at) = card.timestamp {
        embed["timestamp"] = json!(at.to_rfc3339());
    }
    embed
}

fn button_style(style: ButtonStyle) -> u64 {
    match style {
        ButtonStyle::Primary => 1,
        ButtonStyle::Secondary => 2,
        ButtonStyle::Success => 3,
        ButtonStyle::Danger => 4,
    }
}

fn components_json(buttons: &[Button]) -> Value {
    buttons
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            json!({
                "type": 1,
                "components": row.iter().map(|b| json!({
                    "type": 2,
                    "style": button_style(b.style),
                    "label": b.label,
                    "custom_id": b.custom_id,
                })).collect::<Vec<_>>(),
            })
        })
        .collect()
}

fn message_body(message: &OutboundMessage) -> Value {
    let mut body = json!({});
    if let Some(content) = &message.content {
        body["content"] = json!(content);
    }
    if let Some(card) = &message.card {
        body["embeds"] = json!([embed_json(card)]);
    }
    if let Some(reply_to) = message.reply_to {
        body["message_reference"] = json!({
            "message_id": reply_to.to_string(),
            "fail_if_not_exists": true,
        });
    }
    if !message.buttons.is_empty() {
        body["components"] = components_json(&message.buttons);
    }
    body
}

fn interaction_body(reply: &InteractionReply) -> Value {
    let mut data = json!({});
    if let Some(content) = &reply.content {
        data["content"] = json!(content);
    }
    if let Some(card) = &reply.card {
        data["embeds"] = json!([embed_json(card)]);
    }
    if reply.ephemeral {
        data["flags"] = json!(FLAG_EPHEMERAL);
    }
    data
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    #[allow(clippy::too_many_lines)]
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        // Get Gateway URL
        let gw_resp: Value = self
            .client
            .get(format!("{}/gateway/bot", self.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .json()
            .await?;

        let gw_url = gw_resp
            .get("url")
            .and_then(|u| u.as_str())
            .unwrap_or("wss://gateway.discord.gg");

        let ws_url = format!("{gw_url}/?v=10&encoding=json");
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Read Hello (opcode 10)
        let hello = read.next().await.ok_or(anyhow::anyhow!("No hello"))??;
        let hello_data: Value = serde_json::from_str(&hello.to_string())?;
        let heartbeat_interval = hello_data
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(41250);

        // Send Identify (opcode 2)
        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "codewarden",
                    "device": "codewarden"
                }
            }
        });
        write.send(Message::Text(identify.to_string().into())).await?;

        tracing::info!("Discord: connected and identified");

        // Only accessed in the select! loop below, so a plain i64 suffices.
        let mut sequence: i64 = -1;

        let (hb_tx, mut hb_rx) = tokio::sync::mpsc::channel::<()>(1);
        let hb_interval = heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(hb_interval));
            loop {
                interval.tick().await;
                if hb_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    tracing::info!("Discord: closing gateway connection");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                _ = hb_rx.recv() => {
                    let d = if sequence >= 0 { json!(sequence) } else { json!(null) };
                    let hb = json!({"op": 1, "d": d});
                    if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::warn!("Discord: gateway read error: {e}");
                            break;
                        }
                        _ => continue,
                    };

                    let event: Value = match serde_json::from_str(&msg) {
                        Ok(e) => e,
                        Err(_) => continue,
                    };

                    if let Some(s) = event.get("s").and_then(Value::as_i64) {
                        sequence = s;
                    }

                    match event.get("op").and_then(Value::as_u64).unwrap_or(0) {
                        // Op 1: Server requests an immediate heartbeat
                        1 => {
                            let d = if sequence >= 0 { json!(sequence) } else { json!(null) };
                            let hb = json!({"op": 1, "d": d});
                            if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        7 => {
                            tracing::warn!("Discord: received Reconnect (op 7), closing for restart");
                            break;
                        }
                        9 => {
                            tracing::warn!("Discord: received Invalid Session (op 9), closing for restart");
                            break;
                        }
                        0 => {}
                        _ => continue,
                    }

                    let event_type = event.get("t").and_then(Value::as_str).unwrap_or("");
                    let Some(d) = event.get("d") else {
                        continue;
                    };

                    if let Some(inbound) = self.handle_dispatch(event_type, d) {
                        if tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        heartbeat.abort();
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: u64,
        message: &OutboundMessage,
    ) -> anyhow::Result<MessageRef> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);
        let body = message_body(message);
        let created = self
            .send_json(reqwest::Method::POST, &url, Some(&body))
            .await?
            .ok_or_else(|| anyhow::anyhow!("Discord send message returned no body"))?;
        let message_id = created
            .get("id")
            .and_then(snowflake)
            .ok_or_else(|| anyhow::anyhow!("Discord send message returned no id"))?;
        Ok(MessageRef {
            channel_id,
            message_id,
        })
    }

    async fn delete_message(&self, message: MessageRef) -> anyhow::Result<()> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_base, message.channel_id, message.message_id
        );
        self.send_json(reqwest::Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn respond_interaction(
        &self,
        interaction: &Interaction,
        reply: &InteractionReply,
    ) -> anyhow::Result<()> {
        let url = format!(
            "{}/interactions/{}/{}/callback",
            self.api_base, interaction.id, interaction.token
        );
        let body = json!({
            "type": CALLBACK_CHANNEL_MESSAGE,
            "data": interaction_body(reply),
        });
        self.send_json(reqwest::Method::POST, &url, Some(&body)).await?;
        Ok(())
    }

    async fn followup(
        &self,
        interaction: &Interaction,
        reply: &InteractionReply,
    ) -> anyhow::Result<()> {
        let url = format!(
            "{}/webhooks/{}/{}",
            self.api_base, interaction.application_id, interaction.token
        );
        let body = interaction_body(reply);
        self.send_json(reqwest::Method::POST, &url, Some(&body)).await?;
        Ok(())
    }

    fn guild_roles(&self, guild_id: u64) -> Vec<GuildRole> {
        let guilds = self.guilds.read();
        let mut roles: Vec<GuildRole> = guilds
            .get(&guild_id)
            .map(|g| {
                g.roles
                    .iter()
                    .map(|(id, role)| GuildRole {
                        id: *id,
                        name: role.name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        roles.sort_by_key(|r| r.id);
        roles
    }

    fn guild_count(&self) -> usize {
        self.guilds.read().len()
    }

    async fn close(&self) {
        self.shutdown.cancel();
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
