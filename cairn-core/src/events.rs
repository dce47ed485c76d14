use crate::ProfileId;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AppEvent {
    BackupComplete { manual: bool },
    UpdateDownloaded,
    ProfileSwitched { profile: ProfileId },
}

/// Fire-and-forget channel towards the front end.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<AppEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: AppEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
