//! Operator console notifications

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a console message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoLevel {
    Debug,
    Info,
    Error,
}

/// Destination for operator-visible messages
pub trait Console {
    fn echo(&mut self, level: EchoLevel, title: &str, message: &str);
}

/// A message shown on the console
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleMessage {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub level: EchoLevel,
    pub title: String,
    pub message: String,
}

/// Bounded history of console messages, mirrored to the log
#[derive(Debug, Clone)]
pub struct ConsoleLog {
    capacity: usize,
    messages: VecDeque<ConsoleMessage>,
}

impl ConsoleLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            messages: VecDeque::new(),
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &ConsoleMessage> {
        self.messages.iter()
    }
}

impl Console for ConsoleLog {
    fn echo(&mut self, level: EchoLevel, title: &str, message: &str) {
        match level {
            EchoLevel::Debug => tracing::debug!("{}: {}", title, message),
            EchoLevel::Info => tracing::info!("{}: {}", title, message),
            EchoLevel::Error => tracing::error!("{}: {}", title, message),
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(ConsoleMessage {
            timestamp,
            level,
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity() {
        let mut log = ConsoleLog::new(2);
        log.echo(EchoLevel::Info, "t", "one");
        log.echo(EchoLevel::Debug, "t", "two");
        log.echo(EchoLevel::Error, "t", "three");

        let texts: Vec<_> = log.messages().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }
}
