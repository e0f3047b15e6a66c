//! Typed analytics events understood by the backend.
//!
//! The relay forwards any JSON; these types only help callers build payloads
//! the backend accepts and read its acknowledgement.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::messages::{EventSendRequest, EventSendResult};

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum EventError {
    #[error("user_id must not be empty")]
    EmptyUserId,
    #[error("url must not be empty")]
    EmptyUrl,
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("accuracy {0} must not be negative")]
    Accuracy(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    View,
    Click,
    Location,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Click => "click",
            EventType::Location => "location",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewPayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClickPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    View(ViewPayload),
    Click(ClickPayload),
    Location(LocationPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::View(_) => EventType::View,
            EventPayload::Click(_) => EventType::Click,
            EventPayload::Location(_) => EventType::Location,
        }
    }
}

/// One user interaction, shaped as `{ user_id, event_type, payload }`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEvent {
    pub user_id: String,
    pub payload: EventPayload,
}

impl UserEvent {
    pub fn view(user_id: &str, url: &str, title: Option<&str>) -> Self {
        Self {
            user_id: user_id.to_owned(),
            payload: EventPayload::View(ViewPayload {
                url: url.to_owned(),
                title: title.map(str::to_owned),
            }),
        }
    }

    pub fn click(user_id: &str, payload: ClickPayload) -> Self {
        Self {
            user_id: user_id.to_owned(),
            payload: EventPayload::Click(payload),
        }
    }

    pub fn location(user_id: &str, latitude: f64, longitude: f64, accuracy: Option<f64>) -> Self {
        Self {
            user_id: user_id.to_owned(),
            payload: EventPayload::Location(LocationPayload {
                latitude,
                longitude,
                accuracy,
            }),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Applies the same checks the backend runs before accepting an event.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.user_id.is_empty() {
            return Err(EventError::EmptyUserId);
        }
        match &self.payload {
            EventPayload::View(view) => {
                if view.url.is_empty() {
                    return Err(EventError::EmptyUrl);
                }
            }
            EventPayload::Click(_) => {}
            EventPayload::Location(location) => {
                if !(-90.0..=90.0).contains(&location.latitude) {
                    return Err(EventError::Latitude(location.latitude));
                }
                if !(-180.0..=180.0).contains(&location.longitude) {
                    return Err(EventError::Longitude(location.longitude));
                }
                if let Some(accuracy) = location.accuracy {
                    if accuracy < 0.0 || accuracy.is_nan() {
                        return Err(EventError::Accuracy(accuracy));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_request(&self) -> Result<EventSendRequest, serde_json::Error> {
        EventSendRequest::new(self)
    }
}

impl Serialize for UserEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut st = serializer.serialize_struct("UserEvent", 3)?;
        st.serialize_field("user_id", &self.user_id)?;
        st.serialize_field("event_type", &self.event_type())?;
        match &self.payload {
            EventPayload::View(payload) => st.serialize_field("payload", payload)?,
            EventPayload::Click(payload) => st.serialize_field("payload", payload)?,
            EventPayload::Location(payload) => st.serialize_field("payload", payload)?,
        }
        st.end()
    }
}

impl<'de> Deserialize<'de> for UserEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        #[derive(Deserialize)]
        struct Raw {
            user_id: String,
            event_type: EventType,
            payload: Value,
        }

        let raw = Raw::deserialize(deserializer)?;
        let payload = match raw.event_type {
            EventType::View => serde_json::from_value(raw.payload).map(EventPayload::View),
            EventType::Click => serde_json::from_value(raw.payload).map(EventPayload::Click),
            EventType::Location => {
                serde_json::from_value(raw.payload).map(EventPayload::Location)
            }
        }
        .map_err(Error::custom)?;
        Ok(Self {
            user_id: raw.user_id,
            payload,
        })
    }
}

/// The backend's acknowledgement of an accepted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReceipt {
    pub message: String,
    pub event_id: String,
}

impl EventReceipt {
    /// Reads the receipt out of an `EVENT_SENT` result. Returns `None` for
    /// `EVENT_ERROR` results.
    pub fn from_result(result: &EventSendResult) -> Option<Result<Self, serde_json::Error>> {
        match result {
            EventSendResult::Sent { data } => Some(Self::deserialize(data)),
            EventSendResult::Error { .. } => None,
        }
    }
}
