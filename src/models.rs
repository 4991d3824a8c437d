use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Opaque Gmail message handle
pub type MessageId = String;

/// Headers and labels needed to classify one message.
///
/// Only built by [`crate::client::parse_message_metadata`]; everything
/// downstream trusts its shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessageMetadata {
    pub id: MessageId,
    /// Raw `From` header, display name included
    pub sender: String,
    pub subject: String,
    pub labels: BTreeSet<String>,
}

impl MessageMetadata {
    /// Domain part of the sender address, lowercased, without a trailing `>`
    pub fn sender_domain(&self) -> String {
        match self.sender.rsplit_once('@') {
            Some((_, domain)) => domain
                .split('>')
                .next()
                .unwrap_or_default()
                .trim()
                .to_lowercase(),
            None => String::new(),
        }
    }
}

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// The three operator-maintained rule lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub senders: Vec<String>,
    pub subjects: Vec<String>,
    pub domains: Vec<String>,
}

impl RuleSet {
    pub fn get(&self, kind: RuleKind) -> &[String] {
        match kind {
            RuleKind::Sender => &self.senders,
            RuleKind::Subject => &self.subjects,
            RuleKind::Domain => &self.domains,
        }
    }

    pub fn len(&self) -> usize {
        self.senders.len() + self.subjects.len() + self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Sender,
    Subject,
    Domain,
}

impl RuleKind {
    pub const ALL: [RuleKind; 3] = [RuleKind::Sender, RuleKind::Subject, RuleKind::Domain];

    /// Human readable title used by the console
    pub fn title(&self) -> &'static str {
        match self {
            RuleKind::Sender => "Promotional senders",
            RuleKind::Subject => "Promotional subjects",
            RuleKind::Domain => "Promotional domains",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleKind::Sender => "sender",
            RuleKind::Subject => "subject",
            RuleKind::Domain => "domain",
        };
        f.write_str(name)
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sender" | "senders" => Ok(RuleKind::Sender),
            "subject" | "subjects" => Ok(RuleKind::Subject),
            "domain" | "domains" => Ok(RuleKind::Domain),
            other => Err(format!(
                "unknown rule kind '{}', expected senders, subjects or domains",
                other
            )),
        }
    }
}
