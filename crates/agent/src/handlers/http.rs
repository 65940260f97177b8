//! Outbound HTTP calls

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use omnigate_config::HttpPolicy;
use omnigate_eventlog::EventLogger;
use omnigate_session::action::{ApiCall, HttpMethod};
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::util::truncate;
use crate::Result;

const LOG_EXCERPT: usize = 300;

/// GET and POST-JSON calls, approval required
pub struct ApiCallHandler {
    policy: HttpPolicy,
    client: Client,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct ApiArgs {
    #[serde(default = "default_method")]
    method: HttpMethod,
    url: String,
    #[serde(default, alias = "payload")]
    body: Option<Value>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

impl ApiCallHandler {
    pub fn new(policy: HttpPolicy, logger: &EventLogger) -> Self {
        Self {
            policy,
            client: Client::new(),
            logger: logger.scoped(["payload", "headers"]),
        }
    }

    async fn send(&self, call: &ApiCall) -> Result<(u16, String)> {
        let timeout = Duration::from_secs(self.policy.timeout_secs);
        let mut request = match call.method {
            HttpMethod::Get => self.client.get(&call.url),
            HttpMethod::Post => self
                .client
                .post(&call.url)
                .json(call.body.as_ref().unwrap_or(&Value::Null)),
        }
        .timeout(timeout);
        for (name, value) in &call.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!("◆ {} {}", call.method, call.url);
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl ActionHandler for ApiCallHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ApiCall
    }

    fn description(&self) -> &str {
        "Call an HTTP API with GET, or POST a JSON body. Requires approval."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "method": { "type": "string", "enum": ["GET", "POST"] },
                "url": { "type": "string", "description": "http or https URL" },
                "body": { "description": "JSON body for POST" },
                "headers": { "type": "object", "additionalProperties": { "type": "string" } }
            },
            "required": ["url"]
        })
    }

    async fn propose(&self, params: Value, _session: &SessionContext) -> Result<Proposal> {
        let args: ApiArgs = serde_json::from_value(params)?;
        let url = args.url.trim().to_string();
        if url.is_empty() {
            return Ok(Proposal::Rejected("No URL provided.".to_string()));
        }
        match reqwest::Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                return Ok(Proposal::Rejected(format!(
                    "◆ INVALID URL: {} (http or https only)",
                    url
                )))
            }
        }

        let prompt = match (args.method, &args.body) {
            (HttpMethod::Post, Some(body)) => format!(
                "Agent wants to call POST {} with payload {}. Ok to run? (yes/ok/approve)",
                url, body
            ),
            (method, _) => format!(
                "Agent wants to call {} {}. Ok to run? (yes/ok/approve)",
                method, url
            ),
        };
        let body = match args.method {
            HttpMethod::Get => None,
            HttpMethod::Post => args.body,
        };
        Ok(Proposal::Staged {
            payload: PendingPayload::ApiCall(ApiCall {
                method: args.method,
                url,
                body,
                headers: args.headers,
            }),
            prompt,
        })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        _message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let call = match payload {
            PendingPayload::ApiCall(call) => call,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let event = match call.method {
            HttpMethod::Get => "api_get",
            HttpMethod::Post => "api_post",
        };

        match self.send(&call).await {
            Ok((status, text)) => {
                self.logger.log(
                    event,
                    json!({
                        "target": call.url,
                        "status_code": status,
                        "payload": call.body,
                        "response_excerpt": truncate(&text, LOG_EXCERPT),
                    }),
                );
                Ok(Execution::done(format!(
                    "{} {} response ({}):\n{}",
                    call.method,
                    call.url,
                    status,
                    truncate(&text, self.policy.max_response_bytes)
                )))
            }
            Err(e) => {
                self.logger.log(
                    "api_error",
                    json!({
                        "action": event,
                        "target": call.url,
                        "error": truncate(&e.to_string(), LOG_EXCERPT),
                    }),
                );
                Err(e)
            }
        }
    }

    async fn cancel(&self, payload: PendingPayload, _message: &str) -> String {
        if let PendingPayload::ApiCall(call) = payload {
            self.logger.log(
                "api_cancelled",
                json!({"action": call.method.to_string(), "target": call.url}),
            );
        }
        "API call not approved. Cancelling.".to_string()
    }
}
