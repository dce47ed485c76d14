use async_trait::async_trait;
use cairn_core::{AppEvent, CoreError, Notifier, ScriptContext, Shell};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shell for running without a desktop window: events that would reach the
/// renderer are written to the log, the script context is kept for the API.
pub struct HeadlessShell {
    notifier: Notifier,
    context: Mutex<Option<ScriptContext>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl HeadlessShell {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            notifier,
            context: Mutex::new(None),
            forwarder: Mutex::new(None),
        }
    }

    pub fn script_context(&self) -> Option<ScriptContext> {
        self.context.lock().clone()
    }
}

#[async_trait]
impl Shell for HeadlessShell {
    async fn open_window(&self) -> Result<(), CoreError> {
        let mut rx = self.notifier.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "event log fell behind"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        if let Some(old) = self.forwarder.lock().replace(handle) {
            old.abort();
        }
        info!("headless window ready");
        Ok(())
    }

    fn install_script_context(&self, ctx: ScriptContext) {
        debug!(profile = %ctx.profile, scripts = %ctx.scripts_dir.display(), "script context installed");
        *self.context.lock() = Some(ctx);
    }

    async fn unregister_hotkeys(&self) -> Result<(), CoreError> {
        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }
        debug!("hotkeys released");
        Ok(())
    }
}

fn log_event(event: &AppEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!(event = %json, "front-end event"),
        Err(e) => warn!(error = %e, "could not encode event"),
    }
}
