//! Command Handlers.
//!
//! Each handler validates its fields, normalizes the recipient, optionally
//! fetches remote content, and issues exactly one send against whatever
//! session is current when the request runs.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::Json;
use log::info;
use serde_json::Value;
use std::sync::Arc;
use wa_socket::jid::{self, JidKind};
use wa_socket::OutboundContent;

use crate::api::ApiService;
use crate::response::{ApiError, ApiResponse};

pub const DEFAULT_PDF_NAME: &str = "file.pdf";
pub const PDF_MIMETYPE: &str = "application/pdf";

type HandlerResult = Result<Json<ApiResponse>, ApiError>;

pub async fn status(State(api): State<Arc<ApiService>>) -> Json<ApiResponse> {
    let user = match api.sessions.current().await {
        Some(session) => session.user().await,
        None => None,
    };
    Json(ApiResponse::status(user))
}

pub async fn send_message(
    State(api): State<Arc<ApiService>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let body = parse_body(&headers, &body)?;
    let (number, message) = match (required(&body, "number"), required(&body, "message")) {
        (Some(number), Some(message)) => (number, message),
        _ => return Err(ApiError::MissingFields("Missing number or message")),
    };

    let jid = jid::normalize(&number, JidKind::User);
    api.send(&jid, OutboundContent::text(message)).await?;
    Ok(Json(ApiResponse::ok("Message sent!")))
}

pub async fn send_image(
    State(api): State<Arc<ApiService>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let body = parse_body(&headers, &body)?;
    let (number, image_url) = match (required(&body, "number"), required(&body, "imageUrl")) {
        (Some(number), Some(url)) => (number, url),
        _ => return Err(ApiError::MissingFields("Missing number or imageUrl")),
    };
    let caption = optional(&body, "caption").unwrap_or_default();

    let jid = jid::normalize(&number, JidKind::User);
    let fetched = api.fetcher.fetch(&image_url).await?;
    api.send(
        &jid,
        OutboundContent::Image {
            image: fetched.bytes,
            caption,
            mimetype: fetched.content_type,
        },
    )
    .await?;
    Ok(Json(ApiResponse::ok("Image sent!")))
}

pub async fn send_pdf(
    State(api): State<Arc<ApiService>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let body = parse_body(&headers, &body)?;
    let (number, pdf_url) = match (required(&body, "number"), required(&body, "pdfUrl")) {
        (Some(number), Some(url)) => (number, url),
        _ => return Err(ApiError::MissingFields("Missing number or pdfUrl")),
    };
    let file_name = optional(&body, "filename").unwrap_or_else(|| DEFAULT_PDF_NAME.to_string());

    let jid = jid::normalize(&number, JidKind::User);
    let fetched = api.fetcher.fetch(&pdf_url).await?;
    api.send(
        &jid,
        OutboundContent::Document {
            document: fetched.bytes,
            mimetype: PDF_MIMETYPE.to_string(),
            file_name,
        },
    )
    .await?;
    Ok(Json(ApiResponse::ok("PDF sent!")))
}

pub async fn send_to_group(
    State(api): State<Arc<ApiService>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let body = parse_body(&headers, &body)?;
    let (group_id, message) = match (required(&body, "groupId"), required(&body, "message")) {
        (Some(group_id), Some(message)) => (group_id, message),
        _ => return Err(ApiError::MissingFields("Missing groupId or message")),
    };

    let jid = jid::normalize(&group_id, JidKind::Group);
    api.send(&jid, OutboundContent::text(message)).await?;
    Ok(Json(ApiResponse::ok("Message sent to group!")))
}

pub async fn send_button_message(
    State(api): State<Arc<ApiService>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let body = parse_body(&headers, &body)?;
    let buttons = body.get("buttons").and_then(Value::as_array).cloned();
    let (number, text, buttons) =
        match (required(&body, "number"), required(&body, "text"), buttons) {
            (Some(number), Some(text), Some(buttons)) => (number, text, buttons),
            _ => return Err(ApiError::MissingFields("Missing or invalid data")),
        };

    let jid = jid::normalize(&number, JidKind::User);
    api.send(
        &jid,
        OutboundContent::Buttons {
            text,
            buttons,
            header_type: 1,
        },
    )
    .await?;
    Ok(Json(ApiResponse::ok("Button message sent!")))
}

impl ApiService {
    async fn send(&self, jid: &str, content: OutboundContent) -> Result<(), ApiError> {
        let session = self.sessions.current().await.ok_or(ApiError::NotConnected)?;
        let kind = content.kind();
        let key = session.send_message(jid, content).await?;
        info!("Sent {} message {} to {}", kind, key.id, jid);
        Ok(())
    }
}

/// Only `application/json` (or `+json`) bodies are parsed. Any other content
/// type, and an empty body, read as `{}` so the handler reports the missing
/// fields.
fn parse_body(headers: &HeaderMap, body: &[u8]) -> Result<Value, ApiError> {
    if !is_json(headers) || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError::InvalidBody(format!("Failed to parse the request body as JSON: {}", e))
    })
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// A present, truthy field: non-empty string or non-zero number.
fn required(body: &Value, name: &str) -> Option<String> {
    match body.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Optional string field; empty counts as absent.
fn optional(body: &Value, name: &str) -> Option<String> {
    body.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
