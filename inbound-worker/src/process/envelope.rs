//! Mandrill webhook envelope decoding.
//!
//! Mandrill posts a single form field, `mandrill_events`, holding a JSON array
//! of tagged events:
//!
//! ```text
//! [{"event": "inbound", "ts": 1700000000, "msg": {...}}, {"event": "send", ...}]
//! ```
//!
//! Only `inbound` events carry received mail. Every other event type is
//! discarded here, and each inbound event is unwrapped to its `msg` object.

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::error::DecodeError;

/// Event tag Mandrill uses for received messages.
pub const INBOUND_EVENT: &str = "inbound";

/// One received message, as found under an inbound event's `msg` key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub spf: Option<SpfCheck>,
    #[serde(default)]
    pub dkim: Option<DkimCheck>,
    #[serde(default, deserialize_with = "nullable_seq")]
    pub to: Vec<Recipient>,
    #[serde(default, deserialize_with = "nullable_seq")]
    pub cc: Vec<Recipient>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    /// Full RFC 5322 source of the message
    #[serde(default)]
    pub raw_msg: Option<String>,
    #[serde(default)]
    pub headers: Option<Value>,
    /// Address at which Mandrill actually received the message
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub spam_report: Option<Value>,
    #[serde(default, deserialize_with = "keyed_descriptors")]
    pub attachments: Vec<(String, AttachmentDescriptor)>,
    #[serde(default, deserialize_with = "keyed_descriptors")]
    pub images: Vec<(String, AttachmentDescriptor)>,
}

/// SPF verification block.
///
/// `result` is absent when Mandrill hit an error while checking SPF.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpfCheck {
    #[serde(default)]
    pub result: Option<SpfResult>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Possible SPF check outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpfResult {
    Pass,
    Neutral,
    Fail,
    Softfail,
    Temperror,
    Permerror,
    None,
    /// A value Mandrill may add later
    #[serde(other)]
    Unknown,
}

impl SpfResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpfResult::Pass => "pass",
            SpfResult::Neutral => "neutral",
            SpfResult::Fail => "fail",
            SpfResult::Softfail => "softfail",
            SpfResult::Temperror => "temperror",
            SpfResult::Permerror => "permerror",
            SpfResult::None => "none",
            SpfResult::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SpfResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DKIM verification block. Missing or `null` flags read as `false`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DkimCheck {
    #[serde(default, deserialize_with = "nullable_bool")]
    pub signed: bool,
    #[serde(default, deserialize_with = "nullable_bool")]
    pub valid: bool,
}

/// A `[address, display name]` pair from the `to` or `cc` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(address: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
        }
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Mandrill sends `["a@b.com", null]`; tolerate a missing second slot too.
        let parts: Vec<Option<String>> = Vec::deserialize(deserializer)?;
        let mut parts = parts.into_iter();

        let address = parts
            .next()
            .flatten()
            .ok_or_else(|| de::Error::custom("recipient is missing an address"))?;
        let name = parts.next().flatten();

        Ok(Recipient { address, name })
    }
}

/// Attachment or inline image as embedded in the webhook payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Whether `content` is base64 encoded; Mandrill omits it for base64 content
    #[serde(default)]
    pub base64: Option<bool>,
}

impl AttachmentDescriptor {
    pub fn is_base64(&self) -> bool {
        self.base64.unwrap_or(true)
    }
}

/// Outer event object; `msg` stays untyped until the tag is known.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    msg: Option<Value>,
}

/// Decode a `mandrill_events` JSON string into its inbound messages.
///
/// Non-inbound events are dropped. Input order is preserved. Any malformed
/// input fails the whole batch.
pub fn decode_envelope(raw: &str) -> Result<Vec<InboundMessage>, DecodeError> {
    let events: Vec<RawEvent> = serde_json::from_str(raw)?;
    let total = events.len();

    let mut messages = Vec::with_capacity(total);
    for (index, event) in events.into_iter().enumerate() {
        if event.event != INBOUND_EVENT {
            debug!(index = index, event = %event.event, "mandrill_event_skipped");
            continue;
        }

        let msg = match event.msg {
            Some(msg @ Value::Object(_)) => msg,
            _ => return Err(DecodeError::MissingMessage { index }),
        };

        let message = serde_json::from_value(msg)
            .map_err(|source| DecodeError::Message { index, source })?;
        messages.push(message);
    }

    info!(
        event_count = total,
        inbound_count = messages.len(),
        "mandrill_envelope_decoded"
    );

    Ok(messages)
}

/// Accept `null` wherever Mandrill may send an empty list.
fn nullable_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode an attachment mapping while keeping the source key order.
///
/// An empty mapping sometimes arrives as `[]`, so sequences are accepted too.
fn keyed_descriptors<'de, D>(
    deserializer: D,
) -> Result<Vec<(String, AttachmentDescriptor)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct KeyedVisitor;

    impl<'de> Visitor<'de> for KeyedVisitor {
        type Value = Vec<(String, AttachmentDescriptor)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of attachment descriptors")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, descriptor)) = map.next_entry()? {
                entries.push((key, descriptor));
            }
            Ok(entries)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut entries = Vec::new();
            while let Some(descriptor) = seq.next_element::<AttachmentDescriptor>()? {
                let key = descriptor.name.clone().unwrap_or_default();
                entries.push((key, descriptor));
            }
            Ok(entries)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(KeyedVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keeps_only_inbound_events() {
        let raw = r#"[
            {"event": "inbound", "msg": {"email": "one@example.com"}},
            {"event": "send", "msg": {"email": "ignored@example.com"}},
            {"event": "inbound", "msg": {"email": "two@example.com"}}
        ]"#;

        let messages = decode_envelope(raw).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].email.as_deref(), Some("one@example.com"));
        assert_eq!(messages[1].email.as_deref(), Some("two@example.com"));
    }

    #[test]
    fn test_decode_empty_array() {
        assert!(decode_envelope("[]").unwrap().is_empty());
    }

    #[test]
    fn test_decode_malformed_json() {
        let result = decode_envelope("not json");

        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_object_instead_of_array() {
        let result = decode_envelope(r#"{"event": "inbound"}"#);

        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_inbound_without_msg() {
        let raw = r#"[{"event": "send"}, {"event": "inbound"}]"#;

        let result = decode_envelope(raw);

        assert!(matches!(result, Err(DecodeError::MissingMessage { index: 1 })));
    }

    #[test]
    fn test_decode_badly_shaped_message() {
        let raw = r#"[{"event": "inbound", "msg": {"to": "not-a-list"}}]"#;

        let result = decode_envelope(raw);

        assert!(matches!(result, Err(DecodeError::Message { index: 0, .. })));
    }

    #[test]
    fn test_decode_full_message() {
        let raw = r#"[{"event": "inbound", "msg": {
            "spf": {"result": "pass", "detail": "sender SPF authorized"},
            "dkim": {"signed": true, "valid": false},
            "to": [["a@example.com", "A"], ["b@example.com", null]],
            "cc": [["c@example.com"]],
            "from_email": "sender@example.com",
            "from_name": "Sender",
            "subject": "Hello",
            "text": "plain",
            "html": "<p>html</p>",
            "raw_msg": "Subject: Hello\r\n\r\nplain",
            "headers": {"Message-Id": "<abc@example.com>"},
            "email": "a@example.com",
            "spam_report": {"score": 0.1, "matched_rules": []},
            "attachments": {
                "z.txt": {"name": "z.txt", "type": "text/plain", "content": "eg==", "base64": true},
                "a.txt": {"name": "a.txt", "type": "text/plain", "content": "a", "base64": false}
            },
            "images": {}
        }}]"#;

        let messages = decode_envelope(raw).unwrap();
        let msg = &messages[0];

        assert_eq!(msg.spf.as_ref().unwrap().result, Some(SpfResult::Pass));
        let dkim = msg.dkim.as_ref().unwrap();
        assert!(dkim.signed);
        assert!(!dkim.valid);
        assert_eq!(
            msg.to,
            vec![
                Recipient::new("a@example.com", Some("A")),
                Recipient::new("b@example.com", None),
            ]
        );
        assert_eq!(msg.cc, vec![Recipient::new("c@example.com", None)]);
        assert_eq!(msg.from_name.as_deref(), Some("Sender"));
        assert_eq!(msg.raw_msg.as_deref(), Some("Subject: Hello\r\n\r\nplain"));

        // Key order from the payload, not sorted order
        let keys: Vec<&str> = msg.attachments.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z.txt", "a.txt"]);
        assert!(msg.attachments[0].1.is_base64());
        assert!(!msg.attachments[1].1.is_base64());
        assert!(msg.images.is_empty());
    }

    #[test]
    fn test_decode_null_dkim_flags() {
        let raw = r#"[
            {"event": "inbound", "msg": {"subject": "ok", "dkim": {"signed": null, "valid": null}}},
            {"event": "inbound", "msg": {"subject": "partial", "dkim": {"signed": true}}}
        ]"#;

        let messages = decode_envelope(raw).unwrap();

        let dkim = messages[0].dkim.as_ref().unwrap();
        assert!(!dkim.signed);
        assert!(!dkim.valid);
        let dkim = messages[1].dkim.as_ref().unwrap();
        assert!(dkim.signed);
        assert!(!dkim.valid);
    }

    #[test]
    fn test_decode_null_and_empty_list_fields() {
        let raw = r#"[{"event": "inbound", "msg": {
            "to": null,
            "cc": null,
            "attachments": [],
            "images": null
        }}]"#;

        let messages = decode_envelope(raw).unwrap();
        let msg = &messages[0];

        assert!(msg.to.is_empty());
        assert!(msg.cc.is_empty());
        assert!(msg.attachments.is_empty());
        assert!(msg.images.is_empty());
        assert!(msg.spf.is_none());
    }

    #[test]
    fn test_decode_unknown_spf_result() {
        let raw = r#"[{"event": "inbound", "msg": {"spf": {"result": "policy"}}}]"#;

        let messages = decode_envelope(raw).unwrap();

        assert_eq!(
            messages[0].spf.as_ref().unwrap().result,
            Some(SpfResult::Unknown)
        );
    }

    #[test]
    fn test_descriptor_base64_defaults_to_true() {
        let descriptor: AttachmentDescriptor =
            serde_json::from_str(r#"{"name": "a.txt", "content": "aGk="}"#).unwrap();

        assert!(descriptor.is_base64());
    }

    #[test]
    fn test_recipient_without_address_is_rejected() {
        let result: Result<Recipient, _> = serde_json::from_str("[null, \"Name\"]");

        assert!(result.is_err());
    }
}
