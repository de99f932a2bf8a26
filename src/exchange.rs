use serde::{Deserialize, Serialize};

/// The routing algorithm of an exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeKind {
    Custom(String),
    #[default]
    Direct,
    Fanout,
    Headers,
    Topic,
}

impl ExchangeKind {
    /// The name sent over the wire in exchange.declare.
    pub fn kind(&self) -> &str {
        match self {
            Self::Custom(c) => c.as_str(),
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Headers => "headers",
            Self::Topic => "topic",
        }
    }
}

impl From<&str> for ExchangeKind {
    fn from(kind: &str) -> Self {
        match kind {
            "direct" => Self::Direct,
            "fanout" => Self::Fanout,
            "headers" => Self::Headers,
            "topic" => Self::Topic,
            custom => Self::Custom(custom.into()),
        }
    }
}
