//! Reload Scheduler (spec §4.7): a cancellable periodic timer driving
//! [`crate::certs::CertificateStore::reload`].
//!
//! The teacher has no equivalent of its own (roost reloads certificates only
//! on an explicit SIGHUP, `serve/daemon.rs`); this is generalized from that
//! signal-driven one-shot reload into a recurring one, using the same
//! `tokio::select!`-over-a-cancellation-channel shape roost's daemon loop
//! uses to wait for either a timer or a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::certs::CertificateStore;
use crate::hooks::Hooks;
use crate::settings::Settings;

/// Owns the background task driving periodic certificate reloads. Dropping
/// or calling [`ReloadScheduler::stop`] cancels the outstanding timer; a
/// fresh [`ReloadScheduler::start`] call (spec §4.8 `reset`) replaces it.
pub struct ReloadScheduler {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReloadScheduler {
    /// Starts a new background loop reloading `store` every `interval`.
    /// Returns `None` if `interval` is `None` (spec §4.7: `autoReload` unset
    /// disables scheduled reload entirely; `add`/`reset` still reload once).
    pub fn start(
        interval: Option<Duration>,
        store: Arc<CertificateStore>,
        settings: Arc<Settings>,
        hooks: Arc<dyn Hooks>,
    ) -> Option<Self> {
        let interval = interval?;
        let (cancel, mut cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it, `add` already reloaded once.
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = store
                            .reload(
                                &settings.certificates_folder,
                                &settings.certificate_file,
                                &settings.key_file,
                                Arc::clone(&hooks),
                            )
                            .await
                        {
                            tracing::warn!(error = %err, "scheduled certificate reload failed");
                        }
                    }
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Some(Self { cancel, handle })
    }

    /// Cancels the timer (spec §4.8 `reset`: stop any scheduled reload).
    pub fn stop(self) {
        let _ = self.cancel.send(true);
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_background_task() {
        let store = Arc::new(CertificateStore::new());
        let settings = Arc::new(Settings::default());
        let scheduler = ReloadScheduler::start(
            Some(Duration::from_secs(60)),
            store,
            settings,
            Arc::new(NoopHooks),
        )
        .expect("interval was Some");
        scheduler.stop();
    }

    #[test]
    fn no_interval_means_no_scheduler() {
        let store = Arc::new(CertificateStore::new());
        let settings = Arc::new(Settings::default());
        assert!(ReloadScheduler::start(None, store, settings, Arc::new(NoopHooks)).is_none());
    }
}
