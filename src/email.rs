use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parsed message as handed to the detector.
///
/// Header names are matched exactly. Every occurrence of a header is kept in
/// arrival order, so duplicated headers stay visible to the rules.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Email {
    pub from: Option<String>,        // From header address
    pub reply_to: Option<String>,    // Reply-To header address
    pub return_path: Option<String>, // Return-Path without angle brackets
    pub message_id: String,
    pub subject: String,
    pub body: String,
    pub headers: HashMap<String, Vec<String>>,
}

impl Email {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_from(mut self, address: &str) -> Self {
        self.from = Some(address.to_string());
        self
    }

    pub fn with_reply_to(mut self, address: &str) -> Self {
        self.reply_to = Some(address.to_string());
        self
    }

    pub fn with_return_path(mut self, path: &str) -> Self {
        self.return_path = Some(path.to_string());
        self
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    /// Append one occurrence of a header, keeping earlier ones.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.add_header(name, value);
        self
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// First value of a header, if any.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }
}

/// One triggered rule or authenticity finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub weight: i32,
    pub reason: String,
}

/// Verdict for a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub is_spoofed: bool,
    pub reasons: Vec<String>,
    pub score: i32,
    pub signals: Vec<Signal>,
}

impl AnalysisResult {
    pub(crate) fn record(&mut self, name: &str, weight: i32, reason: String) {
        self.score += weight;
        self.reasons.push(reason.clone());
        self.signals.push(Signal {
            name: name.to_string(),
            weight,
            reason,
        });
    }
}
