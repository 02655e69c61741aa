//! User-facing notifications for drain outcomes

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::delivery::NotifierLevel;

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, level: NotifierLevel);
}

/// Forwards notifications to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, level: NotifierLevel) {
        match level {
            NotifierLevel::Error => error!("{}", message),
            NotifierLevel::Warning => warn!("{}", message),
            NotifierLevel::Success | NotifierLevel::Info => info!("{}", message),
        }
    }
}

/// Keeps every notification, for inspection
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, NotifierLevel)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, NotifierLevel)> {
        self.messages.lock().clone()
    }

    pub fn last(&self) -> Option<(String, NotifierLevel)> {
        self.messages.lock().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, level: NotifierLevel) {
        self.messages.lock().push((message.to_string(), level));
    }
}
