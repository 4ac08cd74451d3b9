//! Configuration file watcher for hot reload.
//!
//! Only the gate policy (CSRF settings, presets, route rules, forwarded-for
//! trust, environment) is swapped at runtime. Settings baked into the
//! listener, the router or the counter store are reported as needing a
//! restart and otherwise ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;

/// What changed between two configurations.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// The runtime policy differs and must be swapped.
    pub policy_changed: bool,
    /// Changed settings that only apply after a restart.
    pub restart_required: Vec<&'static str>,
}

impl ConfigDiff {
    pub fn between(current: &GuardConfig, next: &GuardConfig) -> Self {
        let (cur_rl, next_rl) = (&current.rate_limit, &next.rate_limit);
        let policy_changed = current.environment != next.environment
            || current.csrf != next.csrf
            || cur_rl.enabled != next_rl.enabled
            || cur_rl.presets != next_rl.presets
            || cur_rl.routes != next_rl.routes
            || cur_rl.trust_forwarded_for != next_rl.trust_forwarded_for;

        let mut restart_required: Vec<&'static str> = Vec::new();
        let mut check = |name: &'static str, changed: bool| {
            if changed {
                restart_required.push(name);
            }
        };
        check(
            "listener.bind_address",
            current.listener.bind_address != next.listener.bind_address,
        );
        check(
            "listener.max_body_size",
            current.listener.max_body_size != next.listener.max_body_size,
        );
        check(
            "timeouts.request_secs",
            current.timeouts.request_secs != next.timeouts.request_secs,
        );
        check("rate_limit.store", cur_rl.store != next_rl.store);
        check("rate_limit.redis_url", cur_rl.redis_url != next_rl.redis_url);
        check("rate_limit.key_prefix", cur_rl.key_prefix != next_rl.key_prefix);
        check(
            "rate_limit.sweep_interval_secs",
            cur_rl.sweep_interval_secs != next_rl.sweep_interval_secs,
        );

        Self {
            policy_changed,
            restart_required,
        }
    }
}

/// Reload bookkeeping: the config the running policy came from.
struct Reloader {
    path: PathBuf,
    current: GuardConfig,
    update_tx: mpsc::UnboundedSender<GuardConfig>,
}

impl Reloader {
    /// Re-read the file and forward it when the policy changed. Returns
    /// whether an update was sent.
    fn on_change(&mut self) -> bool {
        let next = match load_config(&self.path) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = ?self.path,
                    "Failed to reload config, keeping current policy"
                );
                return false;
            }
        };

        let diff = ConfigDiff::between(&self.current, &next);
        if !diff.restart_required.is_empty() {
            tracing::warn!(
                settings = ?diff.restart_required,
                "Config changes ignored until restart"
            );
        }
        if !diff.policy_changed {
            tracing::debug!(path = ?self.path, "Config touched, policy unchanged");
            return false;
        }

        self.current = next.clone();
        self.update_tx.send(next).is_ok()
    }
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    reloader: Reloader,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, whose contents are currently `current`.
    ///
    /// Returns the watcher and a receiver for policy updates.
    pub fn new(path: &Path, current: GuardConfig) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                reloader: Reloader {
                    path: path.to_path_buf(),
                    current,
                    update_tx,
                },
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.reloader.path.clone();
        let mut reloader = self.reloader;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if reloader.on_change() {
                        tracing::info!("Config change forwarded for policy reload");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::config::{RatePreset, StoreKind};

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("portal-guard-watch-{}.toml", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_diff_policy_changes() {
        let current = GuardConfig::default();
        assert_eq!(ConfigDiff::between(&current, &current), ConfigDiff::default());

        let mut next = current.clone();
        next.csrf.exempt_paths.push("/api/webhooks".into());
        assert!(ConfigDiff::between(&current, &next).policy_changed);

        let mut next = current.clone();
        next.rate_limit.presets.upload = RatePreset::new(5, 60);
        let diff = ConfigDiff::between(&current, &next);
        assert!(diff.policy_changed);
        assert!(diff.restart_required.is_empty());
    }

    #[test]
    fn test_diff_restart_only_changes() {
        let current = GuardConfig::default();
        let mut next = current.clone();
        next.listener.bind_address = "127.0.0.1:9000".into();
        next.rate_limit.store = StoreKind::Redis;

        let diff = ConfigDiff::between(&current, &next);
        assert!(!diff.policy_changed);
        assert_eq!(
            diff.restart_required,
            vec!["listener.bind_address", "rate_limit.store"]
        );
    }

    #[test]
    fn test_reload_forwards_only_policy_changes() {
        let path = temp_path();
        fs::write(&path, "").unwrap();
        let (watcher, mut updates) = ConfigWatcher::new(&path, GuardConfig::default());
        let mut reloader = watcher.reloader;

        // Same policy: nothing forwarded.
        assert!(!reloader.on_change());

        fs::write(&path, "[rate_limit.presets.auth]\nwindow_secs = 60\nmax_requests = 3\n").unwrap();
        assert!(reloader.on_change());
        let update = updates.try_recv().unwrap();
        assert_eq!(update.rate_limit.presets.auth, RatePreset::new(3, 60));

        // Invalid file keeps the current policy.
        fs::write(&path, "[timeouts]\nrequest_secs = 0\n").unwrap();
        assert!(!reloader.on_change());
        assert!(updates.try_recv().is_err());
        assert_eq!(reloader.current.rate_limit.presets.auth, RatePreset::new(3, 60));

        fs::remove_file(&path).unwrap_or_default();
    }
}
