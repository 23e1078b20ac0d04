use std::sync::Arc;
use tokio::sync::Mutex;

use super::store::{Added, VideoLibrary};
use crate::DaemonState;
use crate::media::{self, MediaProbe};

/// Run metadata and thumbnail extraction for a new entry in the background.
///
/// The blocking probe runs on the blocking pool; its result is applied with
/// the entry's ticket, so results for removed or re-added entries are
/// dropped. `library` must be the library inside `state`, borrowed by the
/// caller's lock guard.
pub fn spawn_extraction(
    state: &Arc<Mutex<DaemonState>>,
    probe: &Arc<dyn MediaProbe>,
    library: &mut VideoLibrary,
    added: Added,
) {
    let Added { entry, ticket } = added;
    let Some(cancelled) = library.cancel_token(ticket) else {
        return;
    };

    let state = state.clone();
    let probe = probe.clone();
    let paths = library.paths().clone();

    let handle = tokio::spawn(async move {
        let file_name = entry.file_name.clone();
        let blocking_token = cancelled.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            media::run_extraction(probe.as_ref(), &paths, &entry, &blocking_token)
        })
        .await;

        match outcome {
            Ok(outcome) => {
                state.lock().await.library.apply_extraction(ticket, outcome);
            }
            Err(e) => log::error!("Extraction task for {} failed: {}", file_name, e),
        }
    });

    library.attach_job(ticket, handle.abort_handle());
}

/// Extraction for several entries at once (startup, bundled import)
pub fn spawn_all(
    state: &Arc<Mutex<DaemonState>>,
    probe: &Arc<dyn MediaProbe>,
    library: &mut VideoLibrary,
    pending: Vec<Added>,
) {
    for added in pending {
        spawn_extraction(state, probe, library, added);
    }
}
