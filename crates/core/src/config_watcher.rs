use crate::config::AppConfig;
use crate::config_loader::ConfigLoader;
use anyhow::{Context, Result};
use notify::{Event, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio::sync::watch;

/// Publishes validated configuration reloads on a `watch` channel.
///
/// Readers pick up a new value with `has_changed()` / `borrow_and_update()`
/// at a point of their choosing, so a swap never interleaves with a decision.
pub struct ConfigWatcher {
    tx: watch::Sender<AppConfig>,
}

impl ConfigWatcher {
    /// Creates a new configuration watcher with an initial configuration.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(initial_config: AppConfig) -> (Self, watch::Receiver<AppConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (Self { tx }, rx)
    }

    /// Loads `path`, validates it, and publishes it.
    ///
    /// Returns `false` (leaving the current config in effect) when the file
    /// is unreadable or invalid.
    pub fn reload(&self, path: &Path) -> bool {
        match ConfigLoader::load_from(path) {
            Ok(new_config) => {
                if *self.tx.borrow() == new_config {
                    tracing::debug!(path = %path.display(), "Config unchanged, skipping reload");
                    return true;
                }
                self.tx.send_replace(new_config);
                tracing::info!(path = %path.display(), "Config reloaded successfully");
                true
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Rejected config reload, keeping previous config");
                false
            }
        }
    }

    /// Watches the configuration file for changes and broadcasts updates.
    ///
    /// The parent directory is watched so saves that replace the file by
    /// rename keep being seen. Returns once every receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(self, config_path: impl Into<PathBuf>) -> Result<()> {
        let config_path = config_path.into();
        let file_name = config_path
            .file_name()
            .map(OsStr::to_os_string)
            .with_context(|| format!("Config path has no file name: {}", config_path.display()))?;
        let dir = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            tracing::debug!(dir = %dir.display(), file = ?file_name, "Watching config directory");

            loop {
                match notify_rx.recv_timeout(CLOSED_POLL) {
                    Ok(event) if touches_file(&event, &file_name) => {
                        tracing::info!(path = %config_path.display(), "Config file changed, reloading...");
                        self.reload(&config_path);
                    }
                    Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if self.tx.is_closed() {
                    break;
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

const CLOSED_POLL: Duration = Duration::from_millis(500);

/// A create, write or rename event naming the config file.
fn touches_file(event: &Event, file_name: &OsStr) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn write_config(file: &mut tempfile::NamedTempFile, body: &str) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f.sync_all().unwrap();
    }

    #[test]
    fn valid_reload_is_published() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write_config(&mut file, "[long]\nmax_slots = 3\n");

        let (watcher, mut rx) = ConfigWatcher::new(AppConfig::default());
        assert!(watcher.reload(file.path()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().long.max_slots, 3);
    }

    #[test]
    fn invalid_reload_keeps_previous_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write_config(&mut file, "[long]\nleverage = 500\n");

        let (watcher, rx) = ConfigWatcher::new(AppConfig::default());
        assert!(!watcher.reload(file.path()));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(rx.borrow().long.leverage, dec!(10));
    }

    #[test]
    fn events_are_filtered_on_the_config_file_name() {
        use notify::event::{AccessKind, CreateKind, EventKind, ModifyKind, RenameMode};

        let dir = Path::new("/etc/trendline");
        let name = OsStr::new("Config.toml");
        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(dir.join("Config.toml.swp"))
            .add_path(dir.join("Config.toml"));
        assert!(touches_file(&renamed, name));

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(dir.join("Config.toml"));
        assert!(touches_file(&created, name));

        let sibling = Event::new(EventKind::Create(CreateKind::File)).add_path(dir.join("other.toml"));
        assert!(!touches_file(&sibling, name));

        let read = Event::new(EventKind::Access(AccessKind::Read)).add_path(dir.join("Config.toml"));
        assert!(!touches_file(&read, name));
    }

    #[tokio::test]
    async fn rename_replaced_file_keeps_being_watched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(&path, "").unwrap();

        let (watcher, mut rx) = ConfigWatcher::new(AppConfig::default());
        let task = tokio::spawn(watcher.watch(path.clone()));

        // each save writes a sibling and renames it over the config
        for slots in [3, 4] {
            let mut seen = false;
            for _ in 0..50 {
                let tmp = dir.path().join("Config.toml.tmp");
                std::fs::write(&tmp, format!("[long]\nmax_slots = {slots}\n")).unwrap();
                std::fs::rename(&tmp, &path).unwrap();
                let changed = tokio::time::timeout(Duration::from_millis(100), rx.changed()).await;
                if changed.is_ok() && rx.borrow_and_update().long.max_slots == slots {
                    seen = true;
                    break;
                }
            }
            assert!(seen, "reload with max_slots = {slots} was not published");
        }

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
