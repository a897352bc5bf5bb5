//! Sidecar driver.
//!
//! The browser-automation messaging library runs in a separate sidecar
//! process. This driver calls its JSON API and follows its Server-Sent-Events
//! stream, translating each SSE event into a [`DriverEvent`].

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use reqwest_eventsource::{Event, EventSource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{
    ChatSummary, ClientInfo, Contact, DeliveryReceipt, DriverError, DriverEvent, DriverFactory,
    DriverResult, EventSink, MediaPayload, MessagingDriver, RawMessage,
};

/// Connect timeout for the event stream (the stream itself is unbounded).
const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection settings for the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarOptions {
    /// Base URL of the sidecar API (e.g. "http://127.0.0.1:41900").
    pub base_url: String,
    /// Timeout applied to every request/response call.
    pub timeout: Duration,
    /// Directory holding the persisted authentication session.
    pub auth_dir: PathBuf,
    /// Directory holding the library's web cache.
    pub cache_dir: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    auth_dir: &'a str,
    cache_dir: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    chat_id: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quoted_message_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PictureResponse {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SidecarErrorBody {
    #[serde(default)]
    error: String,
}

/// Driver backed by a sidecar process.
pub struct SidecarDriver {
    client: Client,
    stream_client: Client,
    options: Arc<SidecarOptions>,
    events: EventSink,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SidecarDriver {
    pub fn new(options: Arc<SidecarOptions>, events: EventSink) -> DriverResult<Self> {
        let client = Client::builder().timeout(options.timeout).build()?;
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            stream_client,
            options,
            events,
            stream_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.options.base_url.trim_end_matches('/'), path)
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    async fn send(&self, request: RequestBuilder) -> DriverResult<Response> {
        self.ensure_open()?;
        Ok(request.send().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> DriverResult<T> {
        let response = self.send(self.client.get(self.url(path))).await?;
        handle_response(response).await
    }

    /// GET that maps 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> DriverResult<Option<T>> {
        let response = self.send(self.client.get(self.url(path))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        handle_response(response).await.map(Some)
    }

    async fn post_empty(&self, path: &str, body: Value) -> DriverResult<()> {
        let response = self
            .send(self.client.post(self.url(path)).json(&body))
            .await?;
        check_status(response).await.map(|_| ())
    }

    /// (Re)open the event stream, replacing any previous one.
    fn spawn_event_stream(&self) -> DriverResult<()> {
        let request = self
            .stream_client
            .get(self.url("/events"))
            .header("Accept", "text/event-stream");
        let source = EventSource::new(request)
            .map_err(|e| DriverError::other(format!("cannot open event stream: {e}")))?;

        let events = self.events.clone();
        let task = tokio::spawn(run_event_stream(source, events));

        let mut slot = self
            .stream_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn stop_event_stream(&self) {
        if let Some(task) = self
            .stream_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for SidecarDriver {
    fn drop(&mut self) {
        self.stop_event_stream();
    }
}

/// Forward SSE events until the stream fails or ends, then report a disconnect.
async fn run_event_stream(mut source: EventSource, events: EventSink) {
    let reason = loop {
        match source.next().await {
            Some(Ok(Event::Open)) => {
                debug!("sidecar event stream opened");
            }
            Some(Ok(Event::Message(msg))) => match parse_sidecar_event(&msg.event, &msg.data) {
                Ok(event) => {
                    if events.send(event).is_err() {
                        debug!("sidecar event listener gone, closing stream");
                        source.close();
                        return;
                    }
                }
                Err(e) => {
                    warn!("ignoring sidecar event '{}': {}", msg.event, e);
                }
            },
            Some(Err(e)) => {
                source.close();
                break format!("event stream error: {e}");
            }
            None => break "event stream ended".to_string(),
        }
    };

    info!("sidecar event stream closed: {}", reason);
    let _ = events.send(DriverEvent::Disconnected { reason });
}

/// Translate one SSE event from the sidecar into a driver event.
///
/// The SSE event name is the driver event type. Object payloads carry the
/// variant's fields; a bare string is accepted as the pairing code for `qr`.
pub fn parse_sidecar_event(event_type: &str, data: &str) -> DriverResult<DriverEvent> {
    let event_type = if event_type.is_empty() {
        "message"
    } else {
        event_type
    };

    let parsed: Value = if data.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(data).map_err(|e| DriverError::Parse(e.to_string()))?
    };

    let tagged = match parsed {
        Value::Object(mut map) => {
            map.insert("type".to_string(), Value::String(event_type.to_string()));
            Value::Object(map)
        }
        Value::String(code) if event_type == "qr" => json!({ "type": "qr", "code": code }),
        _ => json!({ "type": event_type }),
    };

    serde_json::from_value(tagged).map_err(|e| DriverError::Parse(e.to_string()))
}

async fn check_status(response: Response) -> DriverResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(DriverError::NotFound(response.url().path().to_string()));
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<SidecarErrorBody>(&text)
        .map(|b| b.error)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or(text);
    Err(DriverError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> DriverResult<T> {
    let response = check_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| DriverError::Parse(e.to_string()))
}

#[async_trait]
impl MessagingDriver for SidecarDriver {
    async fn start(&self) -> DriverResult<()> {
        // Stream first so no lifecycle event emitted during start is missed.
        self.ensure_open()?;
        self.spawn_event_stream()?;

        let body = StartRequest {
            auth_dir: &self.options.auth_dir.to_string_lossy(),
            cache_dir: &self.options.cache_dir.to_string_lossy(),
        };
        let response = self
            .send(self.client.post(self.url("/session/start")).json(&body))
            .await;
        match response {
            Ok(response) => check_status(response).await.map(|_| ()),
            Err(e) => {
                self.stop_event_stream();
                Err(e)
            }
        }
    }

    async fn logout(&self) -> DriverResult<()> {
        self.post_empty("/session/logout", json!({})).await
    }

    async fn shutdown(&self) -> DriverResult<()> {
        self.stop_event_stream();
        let result = self.post_empty("/session/stop", json!({})).await;
        self.closed.store(true, Ordering::SeqCst);
        result
    }

    async fn info(&self) -> DriverResult<Option<ClientInfo>> {
        self.get_optional("/info").await
    }

    async fn chats(&self) -> DriverResult<Vec<ChatSummary>> {
        self.get_json("/chats").await
    }

    async fn chat(&self, chat_id: &str) -> DriverResult<Option<ChatSummary>> {
        self.get_optional(&format!("/chats/{}", urlencoding::encode(chat_id)))
            .await
    }

    async fn fetch_messages(&self, chat_id: &str, limit: usize) -> DriverResult<Vec<RawMessage>> {
        self.get_json(&format!(
            "/chats/{}/messages?limit={}",
            urlencoding::encode(chat_id),
            limit
        ))
        .await
    }

    async fn contact(&self, contact_id: &str) -> DriverResult<Option<Contact>> {
        self.get_optional(&format!("/contacts/{}", urlencoding::encode(contact_id)))
            .await
    }

    async fn profile_pic_url(&self, contact_id: &str) -> DriverResult<Option<String>> {
        let picture: Option<PictureResponse> = self
            .get_optional(&format!(
                "/contacts/{}/picture",
                urlencoding::encode(contact_id)
            ))
            .await?;
        Ok(picture.and_then(|p| p.url))
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> DriverResult<DeliveryReceipt> {
        let request = SendRequest {
            chat_id,
            body,
            quoted_message_id: None,
        };
        let response = self
            .send(self.client.post(self.url("/messages")).json(&request))
            .await?;
        handle_response(response).await
    }

    async fn reply(&self, message: &RawMessage, body: &str) -> DriverResult<DeliveryReceipt> {
        let request = SendRequest {
            chat_id: &message.chat_id,
            body,
            quoted_message_id: Some(&message.id),
        };
        let response = self
            .send(self.client.post(self.url("/messages")).json(&request))
            .await?;
        handle_response(response).await
    }

    async fn download_media(&self, message_id: &str) -> DriverResult<Option<MediaPayload>> {
        self.get_optional(&format!(
            "/messages/{}/media",
            urlencoding::encode(message_id)
        ))
        .await
    }
}

/// Factory producing [`SidecarDriver`]s for one sidecar endpoint.
pub struct SidecarDriverFactory {
    options: Arc<SidecarOptions>,
}

impl SidecarDriverFactory {
    pub fn new(options: SidecarOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }
}

impl DriverFactory for SidecarDriverFactory {
    fn create(&self, events: EventSink) -> DriverResult<Arc<dyn MessagingDriver>> {
        Ok(Arc::new(SidecarDriver::new(self.options.clone(), events)?))
    }
}
