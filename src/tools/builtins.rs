use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use super::{SideEffect, Tool, ToolContext, ToolError, ToolSet};
use crate::resilience::{retry_before_output, ResilientClient};
use crate::Error;

const DEFAULT_MAX_CHARS: usize = 10_000;

/// The tools every deployment ships with.
pub fn builtin_tools(client: ResilientClient) -> Result<ToolSet, Error> {
    ToolSet::new()
        .with(Arc::new(DateTimeTool))?
        .with(Arc::new(GreetingTool))?
        .with(Arc::new(RetrieveTool::new(client)))
}

/// Parse `UTC`, `Z`, `GMT`, or a fixed offset such as `+05:30`, `-4`,
/// `UTC-4` or `GMT+0200`.
pub fn parse_utc_offset(input: &str) -> Option<FixedOffset> {
    let trimmed = input.trim().to_ascii_uppercase();
    let rest = trimmed
        .strip_prefix("UTC")
        .or_else(|| trimmed.strip_prefix("GMT"))
        .unwrap_or(&trimmed);
    if rest.is_empty() || rest == "Z" {
        return FixedOffset::east_opt(0);
    }

    let (sign, digits) = match rest.as_bytes()[0] {
        b'+' => (1, &rest[1..]),
        b'-' => (-1, &rest[1..]),
        _ => return None,
    };

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    if hours.is_empty() || hours.len() > 2 || minutes.is_empty() || minutes.len() > 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn resolve_offset(requested: Option<&str>, ctx: &ToolContext) -> Result<FixedOffset, ToolError> {
    let zone = requested.unwrap_or(&ctx.timezone);
    parse_utc_offset(zone).ok_or_else(|| {
        ToolError::invalid_input(format!(
            "unsupported timezone '{zone}', expected UTC or an offset like +05:30"
        ))
    })
}

/// Current date and time in a given timezone.
pub struct DateTimeTool;

impl DateTimeTool {
    fn describe(now: DateTime<Utc>, offset: FixedOffset) -> Value {
        let local = now.with_timezone(&offset);
        json!({
            "timezone": offset.to_string(),
            "iso": local.to_rfc3339(),
            "date": local.format("%Y-%m-%d").to_string(),
            "time": local.format("%H:%M:%S").to_string(),
            "weekday": local.format("%A").to_string(),
            "unix": now.timestamp(),
        })
    }
}

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time in the user's timezone or a given UTC offset."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "UTC or an offset such as +05:30 or UTC-4"
                }
            }
        })
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let offset = resolve_offset(input["timezone"].as_str(), ctx)?;
        Ok(Self::describe(Utc::now(), offset))
    }
}

/// Time-of-day aware greeting.
pub struct GreetingTool;

impl GreetingTool {
    fn time_of_day(hour: u32) -> &'static str {
        match hour {
            5..=11 => "morning",
            12..=16 => "afternoon",
            17..=20 => "evening",
            _ => "night",
        }
    }

    fn greet(now: DateTime<Utc>, offset: FixedOffset, name: Option<&str>) -> Value {
        let local = now.with_timezone(&offset);
        let part = Self::time_of_day(local.hour());
        let salutation = if part == "night" {
            "Hello".to_string()
        } else {
            format!("Good {part}")
        };
        let greeting = match name {
            Some(name) if !name.trim().is_empty() => format!("{salutation}, {}!", name.trim()),
            _ => format!("{salutation}!"),
        };
        json!({
            "greeting": greeting,
            "timeOfDay": part,
            "localTime": local.format("%H:%M").to_string(),
            "timezone": offset.to_string(),
        })
    }
}

#[async_trait]
impl Tool for GreetingTool {
    fn name(&self) -> &str {
        "greeting"
    }

    fn description(&self) -> &str {
        "Greet the user appropriately for their local time of day."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" }
            }
        })
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let offset = resolve_offset(None, ctx)?;
        Ok(Self::greet(Utc::now(), offset, input["name"].as_str()))
    }
}

/// Fetch a web page through the shared client.
pub struct RetrieveTool {
    client: ResilientClient,
}

impl RetrieveTool {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

#[async_trait]
impl Tool for RetrieveTool {
    fn name(&self) -> &str {
        "retrieve"
    }

    fn description(&self) -> &str {
        "Retrieve the content of a web page by URL."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "minLength": 1 },
                "maxChars": { "type": "integer", "minimum": 1 }
            },
            "required": ["url"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalRead
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let raw = input["url"].as_str().unwrap_or_default();
        let url = reqwest::Url::parse(raw)
            .map_err(|e| ToolError::invalid_input(format!("invalid url '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::invalid_input(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }
        let max_chars = input["maxChars"]
            .as_u64()
            .map_or(DEFAULT_MAX_CHARS, |n| n as usize);

        let client = &self.client;
        let (status, content_type, body) = retry_before_output(
            client.retry_policy(),
            &ctx.deadline,
            &ctx.cancel,
            "retrieve",
            |_| {
                let request = client.http().get(url.clone());
                async move {
                    let (response, _permit) = client.send(request).await?;
                    let status = response.status();
                    if status.is_server_error() || status.as_u16() == 429 {
                        return Err(Error::provider("retrieve", format!("upstream returned {status}")));
                    }
                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = response.text().await?;
                    Ok((status.as_u16(), content_type, body))
                }
            },
        )
        .await
        .map_err(|e| ToolError::execution(e.to_string()))?;

        let (content, truncated) = truncate_chars(&body, max_chars);
        Ok(json!({
            "url": url.as_str(),
            "status": status,
            "contentType": content_type,
            "content": content,
            "truncated": truncated,
        }))
    }
}
