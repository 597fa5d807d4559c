//! MS Teams connector: channel topics and chats rendered as markdown
//! transcripts, plus the files they reference.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use scraper::Html;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use ingest_models::file_type::MIME_TYPE_MARKDOWN;
use ingest_models::messaging::{PARAM_SESSION_ID, PARAM_TEAM_ID};
use ingest_models::{
    ChatSyncState, Connector as ConnectorModel, ConnectorRequest, DocumentStatus, FileType, OAuthToken, SourceType,
    SyncState,
};

use super::drive::{DriveOptions, DriveWalker};
use super::error::ConnectorError;
use super::factory::ConnectorContext;
use super::microsoft::{Channel, Chat, ChatMessage, DriveItem, GraphClient, Page, Team};
use super::traits::{Connector, TaskSink};
use super::types::{
    parse_config, sanitize_file_name, ChangeItem, Checkpoint, ConnectorBase, ConnectorEvent, Content, ContentSource,
    EventSink, RunParams,
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamsConfig {
    /// Team display name; empty picks the first team
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Chat topics to ingest; empty ingests no chats
    #[serde(default)]
    pub chats: Vec<String>,
    #[serde(default = "default_true")]
    pub analyze_attachments: bool,
}

pub struct TeamsConnector {
    base: ConnectorBase,
    config: TeamsConfig,
    token: Option<OAuthToken>,
    state: ChatSyncState,
    context: ConnectorContext,
}

impl TeamsConnector {
    pub fn new(model: &ConnectorModel, context: &ConnectorContext) -> Result<Self, ConnectorError> {
        let config: TeamsConfig = parse_config(model)?;
        let state = match SyncState::decode(&model.source, &model.state)? {
            SyncState::Chat(state) => state,
            _ => ChatSyncState::default(),
        };
        Ok(Self {
            base: ConnectorBase::from_model(model),
            config,
            token: model.oauth_token(),
            state,
            context: context.clone(),
        })
    }

    fn graph(&self) -> GraphClient {
        let authorization = self.token.as_ref().map(|t| t.authorization()).unwrap_or_default();
        GraphClient::new(self.context.http.clone(), &self.context.endpoints.graph_url, authorization)
    }
}

/// Finds the configured team, or the first one when no name is set
async fn resolve_team_id(graph: &GraphClient, name: &str) -> Result<String, ConnectorError> {
    let teams: Vec<Team> = graph.get_all("/teams").await?;
    let team = if name.is_empty() {
        teams.into_iter().next()
    } else {
        teams.into_iter().find(|team| team.display_name == name)
    };
    team.map(|team| team.id)
        .ok_or_else(|| ConnectorError::NotFound(format!("team '{}'", name)))
}

/// Plain text of a message body
pub fn message_text(message: &ChatMessage) -> String {
    let Some(body) = message.body.as_ref() else {
        return String::new();
    };
    if !body.content_type.eq_ignore_ascii_case("html") {
        return body.content.trim().to_string();
    }
    let fragment = Html::parse_fragment(&body.content);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Markdown transcript of `messages`, which must be oldest first
pub fn render_transcript(title: Option<&str>, messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    if let Some(title) = title.filter(|t| !t.is_empty()) {
        out.push_str(&format!("## {}\n\n", title));
    }
    for message in messages {
        out.push_str(&format!(
            "**{}** ({}):\n{}\n\n",
            message.author(),
            message.created_date_time.format("%Y-%m-%d %H:%M:%S UTC"),
            message_text(message)
        ));
    }
    out
}

/// Key accepted by the Graph shares API for a sharing URL
pub fn share_id(content_url: &str) -> String {
    format!("u!{}", URL_SAFE_NO_PAD.encode(content_url.as_bytes()))
}

// ============================================================================
// Run
// ============================================================================

/// Channel topic or chat being rendered into a transcript
struct Conversation<'a> {
    key: &'a str,
    title: Option<&'a str>,
    web_url: Option<String>,
    channel: Option<&'a str>,
}

struct TeamsRun {
    graph: GraphClient,
    base: ConnectorBase,
    config: TeamsConfig,
    state: ChatSyncState,
    attachments: DriveWalker,
    failures: usize,
}

impl TeamsRun {
    async fn run(&mut self, team_id: Option<String>, sink: &EventSink) -> Result<(), ConnectorError> {
        // transcripts have no upstream identity and must survive reconciliation;
        // failed ones are covered again by the retried conversation
        let transcripts: Vec<String> = self
            .base
            .known
            .values()
            .filter(|doc| doc.signature.is_empty() && doc.status != DocumentStatus::Error)
            .map(|doc| doc.source_id.clone())
            .collect();
        for source_id in transcripts {
            sink.seen(source_id).await?;
        }

        let team_id = match team_id {
            Some(id) => id,
            None => resolve_team_id(&self.graph, &self.config.team).await?,
        };

        let channels: Vec<Channel> = self
            .graph
            .get_all(&format!("/teams/{}/channels", team_id))
            .await?;
        for channel in channels {
            if !self.config.channels.is_empty() && !self.config.channels.contains(&channel.display_name) {
                continue;
            }
            if let Err(e) = self.sync_channel(&team_id, &channel, sink).await {
                if matches!(e, ConnectorError::Cancelled) {
                    return Err(e);
                }
                error!("❌ Failed to sync channel {}: {}", channel.display_name, e);
                self.failures += 1;
            }
        }

        if !self.config.chats.is_empty() {
            let chats: Vec<Chat> = self.graph.get_all("/chats").await?;
            for chat in chats {
                let wanted = chat
                    .topic
                    .as_ref()
                    .map(|topic| self.config.chats.contains(topic))
                    .unwrap_or(false);
                if !wanted {
                    continue;
                }
                if let Err(e) = self.sync_chat(&chat, sink).await {
                    if matches!(e, ConnectorError::Cancelled) {
                        return Err(e);
                    }
                    error!("❌ Failed to sync chat {}: {}", chat.id, e);
                    self.failures += 1;
                }
            }
        }

        if self.failures > 0 {
            return Err(ConnectorError::SyncFailed(format!(
                "{} conversation(s) could not be read",
                self.failures
            )));
        }
        Ok(())
    }

    async fn sync_channel(&mut self, team_id: &str, channel: &Channel, sink: &EventSink) -> Result<(), ConnectorError> {
        let start = match self.state.delta_link(&channel.id) {
            Some(link) => link.to_string(),
            None => format!("/teams/{}/channels/{}/messages/microsoft.graph.delta()", team_id, channel.id),
        };

        let mut roots = Vec::new();
        let mut delta_link = None;
        let mut next = Some(start);
        while let Some(url) = next.take() {
            let page: Page<ChatMessage> = self.graph.get(&url).await?;
            roots.extend(page.value.into_iter().filter(|message| {
                message.is_user_message() && self.topic_wanted(message.subject.as_deref())
            }));
            if page.delta_link.is_some() {
                delta_link = page.delta_link;
            }
            next = page.next_link.filter(|link| !link.is_empty());
        }

        info!("💬 Channel {}: {} topic(s) to check", channel.display_name, roots.len());
        for root in roots {
            let replies = format!(
                "/teams/{}/channels/{}/messages/{}/replies",
                team_id, channel.id, root.id
            );
            let cursor = self.state.last_seen(&root.id);
            let mut fresh = self.messages_since(&replies, cursor).await?;
            if cursor.is_none() {
                fresh.push(root.clone());
            }
            let conversation = Conversation {
                key: &root.id,
                title: root.subject.as_deref(),
                web_url: root.web_url.clone(),
                channel: Some(channel.id.as_str()),
            };
            self.emit_conversation(conversation, fresh, sink).await?;
        }

        if let Some(link) = delta_link {
            self.state.set_delta_link(&channel.id, link);
        }
        Ok(())
    }

    async fn sync_chat(&mut self, chat: &Chat, sink: &EventSink) -> Result<(), ConnectorError> {
        let cursor = self.state.last_seen(&chat.id);
        let fresh = self
            .messages_since(&format!("/chats/{}/messages", chat.id), cursor)
            .await?;
        let conversation = Conversation {
            key: &chat.id,
            title: chat.topic.as_deref(),
            web_url: chat.web_url.clone(),
            channel: None,
        };
        self.emit_conversation(conversation, fresh, sink).await
    }

    fn topic_wanted(&self, subject: Option<&str>) -> bool {
        if self.config.topics.is_empty() {
            return true;
        }
        subject.map(|s| self.config.topics.iter().any(|t| t == s)).unwrap_or(false)
    }

    /// Messages newer than `cursor`, newest first, reading pages until the
    /// first message that was already processed
    async fn messages_since(
        &self,
        path: &str,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, ConnectorError> {
        let mut fresh = Vec::new();
        let mut next = Some(self.graph.url(path));
        'pages: while let Some(url) = next.take() {
            let page: Page<ChatMessage> = self.graph.get(&url).await?;
            for message in page.value {
                if let Some(last) = cursor {
                    if message.created_date_time <= last {
                        break 'pages;
                    }
                }
                fresh.push(message);
            }
            next = page.next_link.filter(|link| !link.is_empty());
        }
        Ok(fresh)
    }

    /// Emits one appended transcript for the conversation. `messages`
    /// arrive newest first. The cursor travels with the transcript and is
    /// only moved here when there is nothing to store.
    async fn emit_conversation(
        &mut self,
        conversation: Conversation<'_>,
        messages: Vec<ChatMessage>,
        sink: &EventSink,
    ) -> Result<(), ConnectorError> {
        let Conversation {
            key,
            title,
            web_url,
            channel,
        } = conversation;
        let Some(newest) = messages.iter().map(|m| m.created_date_time).max() else {
            return Ok(());
        };

        let mut conversation: Vec<ChatMessage> = messages.into_iter().filter(|m| m.is_user_message()).collect();
        if conversation.is_empty() {
            self.state.advance(key, newest);
            return Ok(());
        }
        conversation.sort_by_key(|m| m.created_date_time);

        if self.config.analyze_attachments {
            for message in &conversation {
                self.process_attachments(message, sink).await?;
            }
        }

        let transcript = render_transcript(title, &conversation);
        let name = sanitize_file_name(&format!("teams-{}.md", key));
        sink.changed(ChangeItem {
            source_id: Uuid::new_v4().to_string(),
            url: web_url.clone().unwrap_or_default(),
            original_url: web_url,
            name,
            mime_type: MIME_TYPE_MARKDOWN.to_string(),
            file_type: FileType::Md,
            signature: String::new(),
            content: Some(Content {
                bucket: self.base.bucket.clone(),
                source: ContentSource::Inline(Bytes::from(transcript)),
                append: true,
            }),
            checkpoint: Some(Checkpoint {
                key: key.to_string(),
                seen: newest,
                channel: channel.map(str::to_string),
            }),
        })
        .await
    }

    async fn process_attachments(&mut self, message: &ChatMessage, sink: &EventSink) -> Result<(), ConnectorError> {
        for attachment in &message.attachments {
            if attachment.content_type != "reference" {
                continue;
            }
            let Some(content_url) = attachment.content_url.as_deref() else {
                continue;
            };
            let path = format!("/shares/{}/driveItem", share_id(content_url));
            let item: DriveItem = match self.graph.get(&path).await {
                Ok(item) => item,
                Err(e) => {
                    warn!("⚠️ Could not resolve attachment {}: {}", content_url, e);
                    continue;
                }
            };
            match item.into_entry() {
                Some(entry) if !entry.is_folder() => self.attachments.process_file(&entry, sink).await?,
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for TeamsConnector {
    fn source_type(&self) -> SourceType {
        SourceType::MsTeams
    }

    fn validate(&self) -> Result<(), ConnectorError> {
        match &self.token {
            Some(token) if token.is_complete() => Ok(()),
            Some(_) => Err(ConnectorError::InvalidConfiguration("wrong token".to_string())),
            None => Err(ConnectorError::InvalidConfiguration("missing token".to_string())),
        }
    }

    fn execute(self: Box<Self>, cancel: CancellationToken, params: RunParams) -> mpsc::Receiver<ConnectorEvent> {
        let (sink, rx) = EventSink::channel(cancel);
        let options = DriveOptions {
            folder: String::new(),
            recursive: true,
            file_size_limit: params.file_limit(self.context.default_file_limit),
        };
        let team_id = params.team_id().map(str::to_string);
        let this = *self;
        let connector_id = this.base.connector_id;

        let mut run = TeamsRun {
            graph: this.graph(),
            attachments: DriveWalker::new(options, this.base.clone()),
            base: this.base,
            config: this.config,
            state: this.state,
            failures: 0,
        };

        tokio::spawn(async move {
            match run.run(team_id, &sink).await {
                Ok(()) => {
                    run.state.last_scan_at = Some(Utc::now());
                    info!("💬 Teams sync finished for connector {}", connector_id);
                }
                Err(ConnectorError::Cancelled) => return,
                Err(e) => {
                    error!("❌ Teams sync failed for connector {}: {}", connector_id, e);
                    let _ = sink.failed(e).await;
                }
            }
            let _ = sink.emit(ConnectorEvent::State(SyncState::Chat(run.state))).await;
        });
        rx
    }

    /// The stored token may have expired; the run resolves the team itself
    /// after the executor refreshed it.
    async fn prepare_task(&self, session_id: Uuid, sink: &dyn TaskSink) -> Result<(), ConnectorError> {
        let mut request =
            ConnectorRequest::new(self.base.connector_id).with_param(PARAM_SESSION_ID, session_id.to_string());
        match resolve_team_id(&self.graph(), &self.config.team).await {
            Ok(team_id) => request = request.with_param(PARAM_TEAM_ID, team_id),
            Err(e) => warn!("⚠️ Could not resolve team of connector {}: {}", self.base.connector_id, e),
        }
        sink.run_connector(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_config::{ApiEndpoints, GB};
    use ingest_models::Document;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message(id: &str, created: &str, author: &str, html: &str) -> serde_json::Value {
        let subject = if id == "root" { Some("Release plan") } else { None };
        json!({
            "id": id,
            "messageType": "message",
            "subject": subject,
            "createdDateTime": created,
            "from": {"user": {"displayName": author}},
            "body": {"contentType": "html", "content": html}
        })
    }

    fn model(server: &MockServer) -> (ConnectorModel, ConnectorContext) {
        let mut model = ConnectorModel::new(7, "teams", SourceType::MsTeams, Uuid::new_v4());
        model.config = json!({
            "token": {"access_token": "a", "refresh_token": "r", "token_type": "Bearer"},
            "analyze_attachments": false
        });
        let context = ConnectorContext::new(
            reqwest::Client::new(),
            ApiEndpoints {
                graph_url: server.uri(),
                google_drive_url: server.uri(),
            },
            GB,
        );
        (model, context)
    }

    async fn mount_channel(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/teams/T1/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "C1", "displayName": "General"}]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/teams/T1/channels/C1/messages/microsoft.graph.delta()"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    message("root", "2024-06-10T09:00:00Z", "Ana", "<p>Shall we ship?</p>"),
                    {"id": "sys", "messageType": "systemEventMessage", "createdDateTime": "2024-06-10T08:00:00Z"}
                ],
                "@odata.deltaLink": format!("{}/delta?token=abc", server.uri())
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/teams/T1/channels/C1/messages/root/replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    message("r2", "2024-06-10T09:10:00Z", "Ana", "<div>Friday then</div>"),
                    message("r1", "2024-06-10T09:05:00Z", "Bo", "<div>Yes, <b>after</b> QA</div>")
                ]
            })))
            .mount(server)
            .await;
    }

    async fn collect(mut rx: mpsc::Receiver<ConnectorEvent>) -> Vec<ConnectorEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn params() -> RunParams {
        let mut raw = HashMap::new();
        raw.insert(PARAM_TEAM_ID.to_string(), "T1".to_string());
        RunParams::new(raw)
    }

    #[test]
    fn test_html_body_to_text() {
        let message: ChatMessage =
            serde_json::from_value(message("1", "2024-06-10T09:00:00Z", "Ana", "<p>Hello <b>team</b></p>")).unwrap();
        assert_eq!(message_text(&message), "Hello team");
    }

    #[test]
    fn test_share_id_is_unpadded_base64url() {
        assert_eq!(share_id("https://a/b?c"), "u!aHR0cHM6Ly9hL2I_Yw");
    }

    #[tokio::test]
    async fn test_first_run_renders_topic_oldest_first() {
        let server = MockServer::start().await;
        mount_channel(&server).await;
        let (mut model, context) = model(&server);
        let mut transcript = Document::new(7, "old-transcript", "minio:b:teams-x.md");
        transcript.id = Some(1);
        model.docs.push(transcript);

        let connector = TeamsConnector::new(&model, &context).unwrap();
        connector.validate().unwrap();
        let events = collect(Box::new(connector).execute(CancellationToken::new(), params())).await;

        assert_eq!(events[0], ConnectorEvent::seen("old-transcript"));
        let ConnectorEvent::Changed(item) = &events[1] else {
            panic!("expected a transcript, got {:?}", events[1]);
        };
        assert_eq!(item.name, "teams_root.md");
        assert_eq!(item.file_type, FileType::Md);
        assert!(item.signature.is_empty());
        let Some(Content { source: ContentSource::Inline(body), append, .. }) = &item.content else {
            panic!("expected inline content");
        };
        assert!(*append);
        let body = String::from_utf8(body.to_vec()).unwrap();
        let ship = body.find("Shall we ship?").unwrap();
        let qa = body.find("Yes, after QA").unwrap();
        let friday = body.find("Friday then").unwrap();
        assert!(ship < qa && qa < friday);

        let checkpoint = item.checkpoint.as_ref().unwrap();
        assert_eq!(checkpoint.key, "root");
        assert_eq!(checkpoint.seen.to_rfc3339(), "2024-06-10T09:10:00+00:00");
        assert_eq!(checkpoint.channel.as_deref(), Some("C1"));

        // the topic cursor only moves once the executor stored the transcript
        let Some(ConnectorEvent::State(SyncState::Chat(state))) = events.last() else {
            panic!("expected chat state last");
        };
        assert!(state.last_seen("root").is_none());
        assert!(state.delta_link("C1").unwrap().ends_with("/delta?token=abc"));
    }

    #[tokio::test]
    async fn test_failed_transcripts_are_not_kept_alive() {
        let server = MockServer::start().await;
        mount_channel(&server).await;
        let (mut model, context) = model(&server);
        let mut failed = Document::new(7, "failed-transcript", "https://teams/root");
        failed.id = Some(2);
        failed.status = ingest_models::DocumentStatus::Error;
        model.docs.push(failed);

        let connector = TeamsConnector::new(&model, &context).unwrap();
        let events = collect(Box::new(connector).execute(CancellationToken::new(), params())).await;

        assert!(!events.contains(&ConnectorEvent::seen("failed-transcript")));
    }

    #[tokio::test]
    async fn test_no_new_replies_emits_nothing() {
        let server = MockServer::start().await;
        mount_channel(&server).await;
        let (mut model, context) = model(&server);
        let mut state = ChatSyncState::default();
        state.advance("root", "2024-06-10T09:10:00Z".parse().unwrap());
        model.state = SyncState::Chat(state).encode().unwrap();

        let connector = TeamsConnector::new(&model, &context).unwrap();
        let events = collect(Box::new(connector).execute(CancellationToken::new(), params())).await;

        assert!(events.iter().all(|e| !matches!(e, ConnectorEvent::Changed(_))));
        assert!(matches!(events.last(), Some(ConnectorEvent::State(_))));
    }

    #[derive(Default)]
    struct Recorder(tokio::sync::Mutex<Vec<ConnectorRequest>>);

    #[async_trait]
    impl TaskSink for Recorder {
        async fn run_connector(&self, request: ConnectorRequest) -> Result<(), ConnectorError> {
            self.0.lock().await.push(request);
            Ok(())
        }
        async fn up_to_date(&self) -> Result<(), ConnectorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_prepare_task_resolves_team_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "T0", "displayName": "Sales"}, {"id": "T1", "displayName": "Engineering"}]
            })))
            .mount(&server)
            .await;
        let (mut model, context) = model(&server);
        model.config["team"] = json!("Engineering");

        let connector = TeamsConnector::new(&model, &context).unwrap();
        let recorder = Recorder::default();
        connector.prepare_task(Uuid::new_v4(), &recorder).await.unwrap();

        let requests = recorder.0.lock().await;
        assert_eq!(requests[0].params.get(PARAM_TEAM_ID).map(String::as_str), Some("T1"));
    }

    #[tokio::test]
    async fn test_prepare_task_runs_without_team_when_token_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let (model, context) = model(&server);

        let connector = TeamsConnector::new(&model, &context).unwrap();
        let recorder = Recorder::default();
        let session = Uuid::new_v4();
        connector.prepare_task(session, &recorder).await.unwrap();

        let requests = recorder.0.lock().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].params.get(PARAM_TEAM_ID).is_none());
        assert_eq!(
            requests[0].params.get(PARAM_SESSION_ID).map(String::as_str),
            Some(session.to_string().as_str())
        );
    }

    async fn mount_empty_team(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/teams/T1/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_chats_follow_next_links_and_their_own_cursor() {
        let server = MockServer::start().await;
        mount_empty_team(&server).await;
        Mock::given(method("GET"))
            .and(path("/chats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "X1", "topic": "Lunch"}],
                "@odata.nextLink": format!("{}/chats-page-2", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/chats-page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "D1", "topic": "Design sync", "webUrl": "https://teams/d1"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/chats/X1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/chats/D1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    message("m4", "2024-06-10T09:30:00Z", "Bo", "<p>Merged</p>"),
                    {
                        "id": "sys",
                        "messageType": "systemEventMessage",
                        "createdDateTime": "2024-06-10T09:20:00Z",
                        "body": {"contentType": "html", "content": "<p>Ana added Cy</p>"}
                    }
                ],
                "@odata.nextLink": format!("{}/chats/D1/messages-page-2", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/chats/D1/messages-page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    message("m2", "2024-06-10T09:10:00Z", "Ana", "<p>Review the mockups</p>"),
                    message("m1", "2024-06-10T09:00:00Z", "Ana", "<p>Already stored</p>")
                ]
            })))
            .mount(&server)
            .await;

        let (mut model, context) = model(&server);
        model.config["chats"] = json!(["Design sync"]);
        let mut state = ChatSyncState::default();
        state.advance("D1", "2024-06-10T09:00:00Z".parse().unwrap());
        model.state = SyncState::Chat(state).encode().unwrap();

        let connector = TeamsConnector::new(&model, &context).unwrap();
        let events = collect(Box::new(connector).execute(CancellationToken::new(), params())).await;

        let transcripts: Vec<&ChangeItem> = events
            .iter()
            .filter_map(|event| match event {
                ConnectorEvent::Changed(item) => Some(item),
                _ => None,
            })
            .collect();
        assert_eq!(transcripts.len(), 1);
        let item = transcripts[0];
        assert_eq!(item.original_url.as_deref(), Some("https://teams/d1"));
        let Some(Content { source: ContentSource::Inline(body), .. }) = &item.content else {
            panic!("expected inline content");
        };
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.starts_with("## Design sync"));
        assert!(body.find("Review the mockups").unwrap() < body.find("Merged").unwrap());
        assert!(!body.contains("Already stored"));
        assert!(!body.contains("added Cy"));

        let checkpoint = item.checkpoint.as_ref().unwrap();
        assert_eq!(checkpoint.key, "D1");
        assert_eq!(checkpoint.seen.to_rfc3339(), "2024-06-10T09:30:00+00:00");
        assert!(checkpoint.channel.is_none());
        assert!(!events.iter().any(|e| matches!(e, ConnectorEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_reference_attachment_is_sent_as_drive_item() {
        let server = MockServer::start().await;
        mount_empty_team(&server).await;
        Mock::given(method("GET"))
            .and(path("/chats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "D1", "topic": "Design sync"}]
            })))
            .mount(&server)
            .await;
        let shared = "https://contoso.sharepoint.com/sites/eng/roadmap.pdf";
        let mut with_file = message("m1", "2024-06-10T09:00:00Z", "Ana", "<p>See attached</p>");
        with_file["attachments"] = json!([
            {"id": "a1", "contentType": "reference", "contentUrl": shared, "name": "roadmap.pdf"},
            {"id": "a2", "contentType": "messageReference"}
        ]);
        Mock::given(method("GET"))
            .and(path("/chats/D1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [with_file]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/shares/{}/driveItem", share_id(shared))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "F1",
                "name": "roadmap.pdf",
                "size": 64,
                "webUrl": shared,
                "@microsoft.graph.downloadUrl": format!("{}/dl/F1", server.uri()),
                "file": {"mimeType": "application/pdf", "hashes": {"quickXorHash": "h1"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (mut model, context) = model(&server);
        model.config["chats"] = json!(["Design sync"]);
        model.config["analyze_attachments"] = json!(true);

        let connector = TeamsConnector::new(&model, &context).unwrap();
        let events = collect(Box::new(connector).execute(CancellationToken::new(), params())).await;

        let ConnectorEvent::Changed(file) = &events[0] else {
            panic!("expected the attachment first, got {:?}", events[0]);
        };
        assert_eq!(file.source_id, "F1");
        assert_eq!(file.signature, "h1");
        assert_eq!(file.file_type, FileType::Pdf);
        assert!(file.checkpoint.is_none());
        let Some(Content { source: ContentSource::Remote { url, .. }, append, .. }) = &file.content else {
            panic!("expected a download reference");
        };
        assert_eq!(url, &format!("{}/dl/F1", server.uri()));
        assert!(!append);

        let ConnectorEvent::Changed(transcript) = &events[1] else {
            panic!("expected the transcript second, got {:?}", events[1]);
        };
        assert_eq!(transcript.file_type, FileType::Md);
    }
}
