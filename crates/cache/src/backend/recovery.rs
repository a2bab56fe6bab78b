//! Corruption handling
//!
//! Structural damage found at runtime never reaches callers as a typed
//! error. With no handles open the backend resets itself on the spot; with
//! handles open it flips to `Recovering`, keeps those handles serviceable,
//! and restarts once the last one closes. A restart that fails leaves a
//! permanently disabled but consistent backend.

use super::core::{BackendCore, BackendState};
use tracing::{info, warn};

impl BackendCore {
    /// React to structural corruption noticed during a list walk.
    pub(super) fn integrity_event(&mut self) {
        if self.is_disabled() {
            return;
        }
        warn!("cache ranking structure is corrupt");
        if self.open_records > 0 {
            self.state = BackendState::Recovering;
        } else {
            self.restart_now();
        }
    }

    /// Wipe everything and return to service, or disable for good.
    pub(super) fn restart_now(&mut self) {
        if self.shut_down {
            return;
        }
        if self.config.fail_restart || self.reset_all().is_err() {
            warn!("cache restart failed; backend disabled");
            self.state = BackendState::Disabled;
            self.rankings.clear();
            self.key_index.clear();
            self.entry_count = 0;
            self.current_size = 0;
            return;
        }
        self.state = BackendState::Clean;
        self.sync_index(false);
        info!("cache restarted empty after corruption");
    }
}
