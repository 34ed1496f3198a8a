use serde_json::{Map, Value};

/// Key used to wrap a payload that could not be decoded as a JSON object.
pub const RAW_PAYLOAD_KEY: &str = "raw";

/// Event names understood by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Progress,
    DimensionComplete,
    StepComplete,
    ArtifactComplete,
    TypeDetected,
    Complete,
    /// Any name the dispatcher does not recognise.
    Other(String),
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "progress" => Self::Progress,
            "dimension_complete" => Self::DimensionComplete,
            "step_complete" => Self::StepComplete,
            "artifact_complete" => Self::ArtifactComplete,
            "type_detected" => Self::TypeDetected,
            "complete" => Self::Complete,
            other => Self::Other(other.to_string()),
        }
    }

    /// True for kinds forwarded verbatim to a progress observer.
    pub fn is_observed(&self) -> bool {
        matches!(
            self,
            Self::DimensionComplete | Self::StepComplete | Self::ArtifactComplete | Self::TypeDetected
        )
    }
}

/// One decoded stream event. Immutable once produced.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedEvent {
    kind: String,
    data: Map<String, Value>,
    malformed: bool,
}

impl ParsedEvent {
    /// Decodes a frame payload.
    ///
    /// Anything that is not a JSON object becomes `{"raw": <payload>}` so one
    /// bad frame never ends the stream.
    pub fn decode(kind: impl Into<String>, payload: &str) -> Self {
        let kind = kind.into();
        match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(data)) => Self {
                kind,
                data,
                malformed: false,
            },
            Ok(_) | Err(_) => {
                tracing::debug!(event = %kind, "frame payload is not a JSON object; wrapping raw text");
                let mut data = Map::new();
                data.insert(RAW_PAYLOAD_KEY.to_string(), Value::String(payload.to_string()));
                Self {
                    kind,
                    data,
                    malformed: true,
                }
            }
        }
    }

    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
            malformed: false,
        }
    }

    /// Event name as it appeared on the wire.
    pub fn name(&self) -> &str {
        &self.kind
    }

    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.kind)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// True when the payload was substituted by the raw wrapper.
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    /// Convenience accessor for string fields such as `message`.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Payload as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_payload_decodes_into_mapping() {
        let event = ParsedEvent::decode("progress", r#"{"message":"step1","current":1}"#);
        assert_eq!(event.kind(), EventKind::Progress);
        assert_eq!(event.str_field("message"), Some("step1"));
        assert!(!event.is_malformed());
    }

    #[test]
    fn invalid_json_is_wrapped_not_dropped() {
        let event = ParsedEvent::decode("progress", "{not json");
        assert!(event.is_malformed());
        assert_eq!(event.str_field(RAW_PAYLOAD_KEY), Some("{not json"));
    }

    #[test]
    fn non_object_json_is_wrapped() {
        let event = ParsedEvent::decode("complete", "[1,2]");
        assert!(event.is_malformed());
        assert_eq!(event.str_field(RAW_PAYLOAD_KEY), Some("[1,2]"));
    }

    #[test]
    fn unknown_names_map_to_other() {
        assert_eq!(EventKind::parse("heartbeat"), EventKind::Other("heartbeat".into()));
        assert!(EventKind::parse("step_complete").is_observed());
        assert!(!EventKind::parse("complete").is_observed());
    }
}
