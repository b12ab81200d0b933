// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Notifications about changes to the tailed file.

use async_trait::async_trait;
use log::debug;
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// A change relevant to the tailed file
#[derive(Debug)]
pub enum WatchEvent {
    /// File contents or metadata might have changed
    Modified,
    /// The file was moved away or replaced by another file
    Renamed,
    /// The file or its directory was deleted
    Removed,
    /// The notification backend reported an error
    Error(notify::Error),
}

/// A source of [`WatchEvent`] values for a single file
#[async_trait]
pub trait FileWatcher: Send {
    /// Waits for the next event. `None` means that no further events will be delivered.
    async fn next_event(&mut self) -> Option<WatchEvent>;

    /// Releases the resources associated with the watch, subsequent events are discarded.
    fn close(&mut self);
}

/// Events received from the backend but not yet picked up by the consumer.
///
/// Repeated events of the same kind collapse into one, so the state has a fixed size no matter
/// how many notifications arrive while the consumer is busy writing.
#[derive(Debug, Default)]
struct Pending {
    error: Option<notify::Error>,
    modified: bool,
    ended: Option<WatchEvent>,
    closed: bool,
}

impl Pending {
    fn record(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Modified => self.modified = true,
            WatchEvent::Renamed | WatchEvent::Removed => {
                if self.ended.is_none() {
                    self.ended = Some(event);
                }
            }
            WatchEvent::Error(err) => {
                if self.error.is_some() {
                    debug!("dropping watch error while another one is pending: {err}");
                } else {
                    self.error = Some(err);
                }
            }
        }
    }

    fn take(&mut self) -> Option<WatchEvent> {
        if let Some(err) = self.error.take() {
            Some(WatchEvent::Error(err))
        } else if self.modified {
            self.modified = false;
            Some(WatchEvent::Modified)
        } else {
            self.ended.take()
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<Pending>,
    wakeup: Notify,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps a raw backend event to the change it means for `file`, if any.
fn classify(file: &Path, parent: &Path, event: Event) -> Option<WatchEvent> {
    let concerns_file = event.paths.iter().any(|path| path == file);
    let concerns_parent = event.paths.iter().any(|path| path == parent);

    match event.kind {
        EventKind::Modify(ModifyKind::Name(_)) if concerns_file => Some(WatchEvent::Renamed),
        EventKind::Remove(_) if concerns_file || concerns_parent => Some(WatchEvent::Removed),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) if concerns_file => {
            Some(WatchEvent::Modified)
        }
        EventKind::Access(_) => None,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any | EventKind::Other
            if concerns_file =>
        {
            Some(WatchEvent::Modified)
        }
        _ => None,
    }
}

/// File watcher based on the `notify` crate
///
/// Both the file and its parent directory are watched: removing a file that is still open
/// does not always produce a notification for the file itself. Directory events concerning
/// other files are ignored.
///
/// Events not yet consumed are coalesced: any number of modifications is reported once, only
/// the first rename or removal is kept.
pub struct NotifyWatcher {
    watcher: Option<Box<dyn Watcher + Send>>,
    shared: Arc<Shared>,
    file: PathBuf,
    parent: PathBuf,
}

impl NotifyWatcher {
    /// Starts watching a file.
    ///
    /// The platform's native notification mechanism is used unless `poll_interval` is given,
    /// then the file system is polled with that interval instead.
    pub fn watch(path: &Path, poll_interval: Option<Duration>) -> notify::Result<Self> {
        let file = path.canonicalize().map_err(notify::Error::io)?;
        let parent = file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| notify::Error::generic("cannot watch a file without a parent"))?;

        let shared = Arc::new(Shared::default());
        let handler = {
            let shared = shared.clone();
            let file = file.clone();
            let parent = parent.clone();
            move |event: notify::Result<Event>| {
                let event = match event {
                    Ok(event) => match classify(&file, &parent, event) {
                        Some(event) => event,
                        None => return,
                    },
                    Err(err) => WatchEvent::Error(err),
                };
                shared.pending().record(event);
                shared.wakeup.notify_one();
            }
        };

        let mut watcher: Box<dyn Watcher + Send> = match poll_interval {
            Some(interval) => Box::new(PollWatcher::new(
                handler,
                Config::default().with_poll_interval(interval),
            )?),
            None => Box::new(notify::recommended_watcher(handler)?),
        };
        watcher.watch(&file, RecursiveMode::NonRecursive)?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        Ok(Self {
            watcher: Some(watcher),
            shared,
            file,
            parent,
        })
    }
}

#[async_trait]
impl FileWatcher for NotifyWatcher {
    async fn next_event(&mut self) -> Option<WatchEvent> {
        loop {
            {
                let mut pending = self.shared.pending();
                if pending.closed {
                    return None;
                }
                if let Some(event) = pending.take() {
                    return Some(event);
                }
            }
            self.shared.wakeup.notified().await;
        }
    }

    fn close(&mut self) {
        self.watcher = None;
        let mut pending = self.shared.pending();
        *pending = Pending {
            closed: true,
            ..Default::default()
        };
    }
}

impl Debug for NotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcher")
            .field("file", &self.file)
            .field("active", &self.watcher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;
    use test_log::test;
    use tokio::time::timeout;

    fn setup() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.log");
        fs::write(&path, b"").unwrap();
        (dir, path)
    }

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    #[test(tokio::test)]
    async fn classification() {
        let (_dir, path) = setup();
        let watcher = NotifyWatcher::watch(&path, None).unwrap();
        let file = watcher.file.clone();
        let parent = watcher.parent.clone();
        let sibling = parent.join("other.log");

        let check = |kind, path: &Path| classify(&file, &parent, event(kind, path));

        assert!(matches!(
            check(EventKind::Modify(ModifyKind::Data(DataChange::Any)), &file),
            Some(WatchEvent::Modified)
        ));
        assert!(matches!(
            check(EventKind::Access(AccessKind::Close(AccessMode::Write)), &file),
            Some(WatchEvent::Modified)
        ));
        assert!(matches!(
            check(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &file),
            Some(WatchEvent::Renamed)
        ));
        assert!(matches!(
            check(EventKind::Remove(RemoveKind::File), &file),
            Some(WatchEvent::Removed)
        ));
        assert!(matches!(
            check(EventKind::Remove(RemoveKind::Folder), &parent),
            Some(WatchEvent::Removed)
        ));

        assert!(check(EventKind::Access(AccessKind::Read), &file).is_none());
        assert!(check(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &sibling).is_none());
        assert!(check(EventKind::Remove(RemoveKind::File), &sibling).is_none());
        assert!(check(EventKind::Create(CreateKind::File), &sibling).is_none());
        assert!(check(EventKind::Modify(ModifyKind::Data(DataChange::Any)), &sibling).is_none());
    }

    #[test(tokio::test)]
    async fn reports_file_changes() {
        let (_dir, path) = setup();
        let mut watcher = NotifyWatcher::watch(&path, None).unwrap();

        fs::write(&path, b"data").unwrap();
        let event = timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .unwrap();
        assert!(matches!(event, Some(WatchEvent::Modified)));
    }

    #[test]
    fn pending_events_collapse() {
        let mut pending = Pending::default();
        for _ in 0..1000 {
            pending.record(WatchEvent::Modified);
        }
        pending.record(WatchEvent::Error(notify::Error::generic("first")));
        pending.record(WatchEvent::Error(notify::Error::generic("second")));
        pending.record(WatchEvent::Renamed);
        pending.record(WatchEvent::Removed);
        pending.record(WatchEvent::Modified);

        assert!(matches!(
            pending.take(),
            Some(WatchEvent::Error(err)) if err.to_string().contains("first")
        ));
        assert!(matches!(pending.take(), Some(WatchEvent::Modified)));
        assert!(matches!(pending.take(), Some(WatchEvent::Renamed)));
        assert!(pending.take().is_none());
    }

    #[test(tokio::test)]
    async fn bursts_are_coalesced() {
        let (_dir, path) = setup();
        let mut watcher = NotifyWatcher::watch(&path, None).unwrap();

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        for _ in 0..2000 {
            file.write_all(b"line\n").unwrap();
        }
        drop(file);
        fs::remove_file(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let first = timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .unwrap();
        assert!(matches!(first, Some(WatchEvent::Modified)));
        let second = timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .unwrap();
        assert!(matches!(second, Some(WatchEvent::Removed)));
        assert!(timeout(Duration::from_millis(200), watcher.next_event())
            .await
            .is_err());
    }

    #[test(tokio::test)]
    async fn reports_rename() {
        let (dir, path) = setup();
        let mut watcher = NotifyWatcher::watch(&path, None).unwrap();

        fs::rename(&path, dir.path().join("moved.log")).unwrap();
        let event = timeout(Duration::from_secs(5), async {
            loop {
                match watcher.next_event().await {
                    Some(WatchEvent::Modified) => continue,
                    other => break other,
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(event, Some(WatchEvent::Renamed)));
    }

    #[test(tokio::test)]
    async fn polling_backend() {
        let (_dir, path) = setup();
        let mut watcher = NotifyWatcher::watch(&path, Some(Duration::from_millis(20))).unwrap();

        // Make sure the modification time differs from the initial scan
        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&path, b"more data").unwrap();
        let event = timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .unwrap();
        assert!(matches!(event, Some(WatchEvent::Modified)));
    }

    #[test(tokio::test)]
    async fn closed_watcher_ends_events() {
        let (_dir, path) = setup();
        let mut watcher = NotifyWatcher::watch(&path, None).unwrap();
        watcher.close();
        assert!(watcher.watcher.is_none());

        fs::write(&path, b"ignored").unwrap();
        let event = timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(NotifyWatcher::watch(&dir.path().join("missing"), None).is_err());
    }
}
