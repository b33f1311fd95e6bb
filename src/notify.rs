//! Best-effort failure notifications

use crate::check::models::ProxyDescriptor;
use crate::http::{HttpTransport, RequestOptions, RetryingHttpClient};
use reqwest::Method;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Telegram sink for per-batch failure summaries. Delivery is strictly
/// best-effort: a failed send is logged and forgotten.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    http: RetryingHttpClient,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            bot_token,
            chat_id,
            http: RetryingHttpClient::new(transport),
        }
    }

    /// Send one message listing every failed proxy in the batch.
    pub async fn notify_failures(&self, batch_name: Option<&str>, failed: &[ProxyDescriptor]) {
        if failed.is_empty() {
            return;
        }
        let header = format!("`{}` 节点测试:", batch_name.unwrap_or("proxies"));
        let lines: Vec<String> = failed
            .iter()
            .map(|proxy| format!("❌ [{}] `{}`", proxy.proxy_type(), proxy.name()))
            .collect();
        let text = format!("{header}\n{}", lines.join("\n"));

        let message = SendMessage {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: "MarkdownV2",
        };
        let body = match serde_json::to_string(&message) {
            Ok(body) => body,
            Err(err) => {
                warn!("could not encode notification: {err}");
                return;
            }
        };
        let options = RequestOptions::new(
            Method::POST,
            format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token),
        )
        .with_header("Content-Type", "application/json")
        .with_body(body);

        if let Err(err) = self.http.request(&options).await {
            warn!("failure notification not delivered: {err}");
        }
    }
}
