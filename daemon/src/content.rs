//! Active content selection.
//!
//! Holds the one content source that should currently be rendered. Writers
//! replace it (last write wins); the playback controller observes it.

use common::ContentSource;
use tokio::sync::watch;

pub struct ContentBridge {
    tx: watch::Sender<Option<ContentSource>>,
}

impl ContentBridge {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn set(&self, source: ContentSource) {
        log::info!("Active content: {:?}", source);
        self.tx.send_replace(Some(source));
    }

    pub fn clear(&self) {
        if self.tx.borrow().is_some() {
            log::info!("Active content cleared");
        }
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<ContentSource> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ContentSource>> {
        self.tx.subscribe()
    }
}

impl Default for ContentBridge {
    fn default() -> Self {
        Self::new()
    }
}
