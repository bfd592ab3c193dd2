//! Notification transports
//!
//! Notification nodes hand a resolved [`Notification`] to the
//! [`NotificationDispatcher`], which routes it by channel. Delivery failures
//! are reported back to the node and never fail the execution.

use async_trait::async_trait;
use panel_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Webhook,
    #[default]
    System,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Webhook => "webhook",
            Self::System => "system",
        }
    }

    /// Whether the channel needs explicit recipients
    pub fn needs_recipients(&self) -> bool {
        *self != Self::System
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "webhook" => Ok(Self::Webhook),
            "system" => Ok(Self::System),
            other => Err(Error::Config(format!("unknown notification channel '{other}'"))),
        }
    }
}

/// A fully resolved notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: Channel,
    pub recipients: Vec<String>,
    pub title: String,
    pub message: String,
}

/// Transport for one channel
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Routes notifications to the transport registered for their channel
pub struct NotificationDispatcher {
    transports: HashMap<Channel, Arc<dyn NotificationTransport>>,
}

impl NotificationDispatcher {
    /// Dispatcher with the `system` channel wired to [`TracingTransport`]
    pub fn new() -> Self {
        let mut transports: HashMap<Channel, Arc<dyn NotificationTransport>> = HashMap::new();
        transports.insert(Channel::System, Arc::new(TracingTransport));
        Self { transports }
    }

    /// Dispatcher with `system` and a [`WebhookTransport`] for `webhook`
    pub fn standard(webhook_timeout: Duration) -> Result<Self> {
        let webhook = WebhookTransport::new(webhook_timeout)?;
        Ok(Self::new().with_transport(Channel::Webhook, Arc::new(webhook)))
    }

    pub fn with_transport(mut self, channel: Channel, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transports.insert(channel, transport);
        self
    }

    pub fn has_transport(&self, channel: Channel) -> bool {
        self.transports.contains_key(&channel)
    }

    pub async fn dispatch(&self, notification: &Notification) -> Result<()> {
        let transport = self.transports.get(&notification.channel).ok_or_else(|| {
            Error::Generic(format!(
                "no transport registered for channel '{}'",
                notification.channel
            ))
        })?;
        debug!(channel = %notification.channel, recipients = notification.recipients.len(), "Dispatching notification");
        transport.send(notification).await
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes notifications to the tracing subscriber
pub struct TracingTransport;

#[async_trait]
impl NotificationTransport for TracingTransport {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            channel = %notification.channel,
            title = %notification.title,
            message = %notification.message,
            "Notification"
        );
        Ok(())
    }
}

/// Posts notifications as JSON to each recipient URL
pub struct WebhookTransport {
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build webhook client: {e}")))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (proxy, TLS or header settings)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn send(&self, notification: &Notification) -> Result<()> {
        for url in &notification.recipients {
            self.client
                .post(url)
                .json(notification)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| Error::Generic(format!("webhook delivery to {url} failed: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    struct Recording(Mutex<Vec<Notification>>);

    #[async_trait]
    impl NotificationTransport for Recording {
        async fn send(&self, notification: &Notification) -> Result<()> {
            self.0.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn notification(channel: Channel) -> Notification {
        Notification {
            channel,
            recipients: vec!["ops@example.com".to_string()],
            title: "Panel finished".to_string(),
            message: "Consensus reached".to_string(),
        }
    }

    #[test]
    fn test_channel_parsing() {
        assert_eq!("Email".parse::<Channel>().unwrap(), Channel::Email);
        assert!("pigeon".parse::<Channel>().is_err());
        assert!(!Channel::System.needs_recipients());
        assert!(Channel::Sms.needs_recipients());
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_channel() {
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        let dispatcher = NotificationDispatcher::new().with_transport(Channel::Email, recording.clone());

        dispatcher.dispatch(&notification(Channel::Email)).await.unwrap();
        dispatcher.dispatch(&notification(Channel::System)).await.unwrap();

        assert_eq!(recording.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_transport_is_an_error() {
        let dispatcher = NotificationDispatcher::new();
        assert!(dispatcher.dispatch(&notification(Channel::Sms)).await.is_err());
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        body.len() >= length
    }

    /// Accept one HTTP request, answer with `status` and return the raw request
    async fn serve_once(status: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&received) {
                    break;
                }
            }
            let response =
                format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&received).into_owned()
        });
        (url, handle)
    }

    fn local_webhook() -> WebhookTransport {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        WebhookTransport::with_client(client)
    }

    #[test]
    fn test_standard_dispatcher_has_webhook() {
        let dispatcher = NotificationDispatcher::standard(Duration::from_secs(1)).unwrap();
        assert!(dispatcher.has_transport(Channel::System));
        assert!(dispatcher.has_transport(Channel::Webhook));
        assert!(!dispatcher.has_transport(Channel::Email));
    }

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let (url, server) = serve_once("200 OK").await;
        let dispatcher = NotificationDispatcher::new()
            .with_transport(Channel::Webhook, Arc::new(local_webhook()));

        let mut webhook = notification(Channel::Webhook);
        webhook.recipients = vec![url];
        dispatcher.dispatch(&webhook).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains(r#""title":"Panel finished""#));
        assert!(request.contains(r#""channel":"webhook""#));
    }

    #[tokio::test]
    async fn test_webhook_error_status_fails_delivery() {
        let (url, server) = serve_once("500 Internal Server Error").await;
        let transport = local_webhook();

        let mut webhook = notification(Channel::Webhook);
        webhook.recipients = vec![url.clone()];
        let err = transport.send(&webhook).await.unwrap_err();

        assert!(err.to_string().contains(&url));
        server.await.unwrap();
    }
}
