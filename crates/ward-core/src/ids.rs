use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an identifier supplied by a caller or read back from storage.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(ConversationId, "chat");
branded_id!(MessageId, "msg");
branded_id!(ToolCallId, "call");
branded_id!(UserId, "user");
branded_id!(PatientId, "pat");
branded_id!(DocumentId, "doc");
branded_id!(TurnId, "turn");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(ConversationId::new().as_str().starts_with("chat_"));
        assert!(MessageId::new().as_str().starts_with("msg_"));
        assert!(ToolCallId::new().as_str().starts_with("call_"));
        assert!(PatientId::new().as_str().starts_with("pat_"));
        assert!(TurnId::new().as_str().starts_with("turn_"));
    }

    #[test]
    fn serializes_as_bare_string() {
        let id = MessageId::from_raw("m-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""m-1""#);
        let parsed: MessageId = serde_json::from_str(r#""m-1""#).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn blank_detection() {
        assert!(ConversationId::from_raw("  ").is_blank());
        assert!(!ConversationId::from_raw("c1").is_blank());
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<MessageId> = (0..100).map(|_| MessageId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
