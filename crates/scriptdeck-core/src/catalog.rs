use std::sync::{Arc, Mutex};

use scriptdeck_client::{ClientError, ScriptHub, ScriptInfo};
use tokio::sync::watch;

use crate::store::LoadState;

/// Cache of the server's script listing, in server order.
pub struct ScriptCatalog {
    hub: Arc<dyn ScriptHub>,
    inner: Mutex<Vec<ScriptInfo>>,
    state: watch::Sender<LoadState>,
}

impl ScriptCatalog {
    #[must_use]
    pub fn new(hub: Arc<dyn ScriptHub>) -> Self {
        let (state, _rx) = watch::channel(LoadState::Loading);
        Self {
            hub,
            inner: Mutex::new(Vec::new()),
            state,
        }
    }

    /// Fetch the listing. On failure the previous listing stays available
    /// and the load state carries the error.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        match self.hub.scripts().await {
            Ok(scripts) => {
                {
                    let mut inner = self
                        .inner
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    *inner = scripts;
                }
                self.state.send_replace(LoadState::Ready);
                Ok(())
            }
            Err(error) => {
                self.state.send_replace(LoadState::Failed {
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    #[must_use]
    pub fn all(&self) -> Vec<ScriptInfo> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    #[must_use]
    pub fn get(&self, script: &str) -> Option<ScriptInfo> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|info| info.script == script)
            .cloned()
    }

    #[must_use]
    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }
}
