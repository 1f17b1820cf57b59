use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::StoreError;
use crate::store::SelfWriteGuard;

/// How often an idle debounce thread checks whether it should stop.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The record was changed by someone else and should be reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSignal;

/// Watches the pin record for writes made by other processes.
///
/// Raw filesystem events are coalesced on a background thread. Once the
/// record has been quiet for the debounce interval, a [`ReloadSignal`] is
/// sent unless the guard says the write was our own. The hierarchy itself is
/// never touched here; the owner drains the receiver on its own thread.
pub struct ChangeNotifier {
    watcher: Option<RecommendedWatcher>,
    stop: Arc<AtomicBool>,
}

impl ChangeNotifier {
    pub fn watch(
        record: &Path,
        debounce: Duration,
        guard: SelfWriteGuard,
    ) -> Result<(Self, Receiver<ReloadSignal>), StoreError> {
        // Watch the directory: the record is replaced by rename, and may not
        // exist yet.
        let dir = match record.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => Path::new(".").to_path_buf(),
        };
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
        let file_name = record.file_name().map(|n| n.to_os_string()).unwrap_or_default();

        let (raw_tx, raw_rx) = mpsc::channel::<()>();
        let (reload_tx, reload_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_record_change(&event, &file_name) => {
                trace!(?event, "pin record touched");
                let _ = raw_tx.send(());
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "file watch error"),
        })
        .map_err(|source| StoreError::Watch {
            path: dir.clone(),
            source,
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| StoreError::Watch {
                path: dir.clone(),
                source,
            })?;

        let thread_stop = stop.clone();
        thread::spawn(move || debounce_loop(raw_rx, reload_tx, debounce, guard, thread_stop));

        debug!(dir = %dir.display(), "watching pin record");
        Ok((
            Self {
                watcher: Some(watcher),
                stop,
            },
            reload_rx,
        ))
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.watcher.take();
    }
}

fn is_record_change(event: &Event, file_name: &OsString) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

fn debounce_loop(
    raw_rx: Receiver<()>,
    reload_tx: Sender<ReloadSignal>,
    debounce: Duration,
    guard: SelfWriteGuard,
    stop: Arc<AtomicBool>,
) {
    loop {
        match raw_rx.recv_timeout(IDLE_POLL_INTERVAL) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }

        // Let the writer finish: wait until the record has been quiet for a
        // whole debounce interval.
        loop {
            match raw_rx.recv_timeout(debounce) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        if stop.load(Ordering::Relaxed) {
            return;
        }
        if guard.is_suppressed() {
            debug!("ignoring change caused by our own save");
            continue;
        }
        debug!("pin record changed externally");
        if reload_tx.send(ReloadSignal).is_err() {
            return;
        }
    }
}
