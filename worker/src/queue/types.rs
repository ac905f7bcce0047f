//! Queue message types.
//!
//! The publisher serializes one [`EmailRequest`] per AMQP message. Field names
//! follow the publisher's JSON format.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Content type used when a request does not carry one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Recipient of an outbound email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

/// Named template reference with its substitution data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: HashMap<String, String>,
}

/// Outbound email request as enqueued by the publisher.
///
/// Decoding is lenient: absent or `null` text fields and lists decode as
/// empty, so a payload the publisher accepted never turns into a message
/// that fails on every redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub receiver: Receiver,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject: String,
    /// Body text. Empty when the publisher sent a template instead.
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    /// Template chosen by the publisher, carried but not rendered here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateRef>,
    /// MIME type of `message` (e.g. `text/plain`, `text/html`)
    #[serde(
        default = "default_content_type",
        deserialize_with = "content_type_or_default",
        rename = "type"
    )]
    pub content_type: String,
    /// Object-store identifiers of the files to attach
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<String>,
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn content_type_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|t| !t.is_empty())
        .unwrap_or_else(default_content_type))
}

impl EmailRequest {
    /// Parse a job payload.
    pub fn from_slice(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_request_deserialization() {
        let json = r#"{
            "receiver": {"name": "Ada", "email": "ada@example.com"},
            "subject": "Welcome",
            "message": "<p>Hello</p>",
            "template": {"name": "welcome", "data": {"first_name": "Ada"}},
            "type": "text/html",
            "attachments": ["report.pdf", "logo.png"]
        }"#;

        let request = EmailRequest::from_slice(json.as_bytes()).unwrap();
        assert_eq!(request.receiver.name, "Ada");
        assert_eq!(request.receiver.email, "ada@example.com");
        let template = request.template.unwrap();
        assert_eq!(template.name, "welcome");
        assert_eq!(template.data["first_name"], "Ada");
        assert_eq!(request.content_type, "text/html");
        assert_eq!(request.attachments, vec!["report.pdf", "logo.png"]);
    }

    #[test]
    fn test_email_request_deserialization_minimal() {
        let json = r#"{
            "receiver": {"email": "ada@example.com"},
            "subject": "Hi",
            "message": "Hello"
        }"#;

        let request = EmailRequest::from_slice(json.as_bytes()).unwrap();
        assert_eq!(request.receiver.name, "");
        assert_eq!(request.template, None);
        assert_eq!(request.content_type, DEFAULT_CONTENT_TYPE);
        assert!(request.attachments.is_empty());
    }

    #[test]
    fn test_template_job_without_message() {
        let json = r#"{
            "receiver": {"name": "Ada", "email": "ada@example.com"},
            "subject": "Welcome",
            "template": {"name": "welcome"}
        }"#;

        let request = EmailRequest::from_slice(json.as_bytes()).unwrap();
        assert_eq!(request.message, "");
        let template = request.template.unwrap();
        assert_eq!(template.name, "welcome");
        assert!(template.data.is_empty());
    }

    #[test]
    fn test_null_fields_decode_as_empty() {
        let json = r#"{
            "receiver": {"email": "ada@example.com"},
            "subject": null,
            "message": null,
            "template": null,
            "type": null,
            "attachments": null
        }"#;

        let request = EmailRequest::from_slice(json.as_bytes()).unwrap();
        assert_eq!(request.subject, "");
        assert_eq!(request.message, "");
        assert_eq!(request.template, None);
        assert_eq!(request.content_type, DEFAULT_CONTENT_TYPE);
        assert!(request.attachments.is_empty());
    }

    #[test]
    fn test_missing_subject_and_message_decode_as_empty() {
        let json = r#"{"receiver": {"email": "ada@example.com"}}"#;

        let request = EmailRequest::from_slice(json.as_bytes()).unwrap();
        assert_eq!(request.subject, "");
        assert_eq!(request.message, "");
    }

    #[test]
    fn test_email_request_rejects_missing_receiver() {
        let json = r#"{"subject": "Hi", "message": "Hello"}"#;
        assert!(EmailRequest::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn test_email_request_rejects_garbage() {
        assert!(EmailRequest::from_slice(b"\x00not json").is_err());
    }
}
