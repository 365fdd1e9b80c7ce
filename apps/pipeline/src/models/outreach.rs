use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    #[serde(rename = "linkedin")]
    LinkedIn,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::LinkedIn => "linkedin",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Draft,
    Sent,
    Failed,
    Responded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachMessage {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub campaign_id: Uuid,
    pub channel: Channel,
    /// Email address or profile URL, depending on channel.
    pub recipient: String,
    pub content: String,
    pub status: MessageStatus,
    pub delivery_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl OutreachMessage {
    pub fn draft(
        candidate_id: Uuid,
        campaign_id: Uuid,
        channel: Channel,
        recipient: String,
        content: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate_id,
            campaign_id,
            channel,
            recipient,
            content,
            status: MessageStatus::Draft,
            delivery_id: None,
            created_at: Utc::now(),
            sent_at: None,
            responded_at: None,
        }
    }

    /// A message that has left the building. Such a message must never be sent again.
    pub fn is_dispatched(&self) -> bool {
        matches!(self.status, MessageStatus::Sent | MessageStatus::Responded)
    }

    pub fn mark_sent(&mut self, delivery_id: String) {
        self.status = MessageStatus::Sent;
        self.delivery_id = Some(delivery_id);
        self.sent_at = Some(Utc::now());
    }

    pub fn mark_responded(&mut self, at: DateTime<Utc>) {
        self.status = MessageStatus::Responded;
        self.responded_at = Some(at);
    }
}

/// Inbound signal that a candidate answered an outreach message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSignal {
    #[serde(default)]
    pub delivery_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linkedin_channel_wire_name() {
        assert_eq!(
            serde_json::to_string(&Channel::LinkedIn).unwrap(),
            "\"linkedin\""
        );
        assert_eq!(Channel::LinkedIn.to_string(), "linkedin");
    }

    #[test]
    fn test_message_lifecycle() {
        let mut message = OutreachMessage::draft(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Channel::Email,
            "ada@example.com".to_string(),
            "Hello".to_string(),
        );
        assert!(!message.is_dispatched());
        message.mark_sent("dlv-1".to_string());
        assert!(message.is_dispatched());
        assert_eq!(message.delivery_id.as_deref(), Some("dlv-1"));
        message.mark_responded(Utc::now());
        assert_eq!(message.status, MessageStatus::Responded);
        assert!(message.is_dispatched());
    }
}
