//! Playback state machine.
//!
//! `Idle -> load -> Playing -> load -> Playing -> stop -> Idle`. Loading
//! always stops the previous renderer first; settings changes are applied to
//! the live renderer without restarting it. Content that cannot be placed
//! because no display is attached waits until one shows up.

use anyhow::{Result, bail};
use common::{ContentSource, DisplayInfo, PlaybackStatus, Settings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::stats::VideoStats;
use super::{
    Desktop, Renderer, RendererFactory, bitrate_cap_for_quality, resolve_content, select_display,
};
use crate::resource_monitor::ResourceMonitor;

struct Active {
    source: ContentSource,
    display: DisplayInfo,
    renderer: Box<dyn Renderer>,
}

enum PlaybackState {
    Idle,
    Playing(Active),
}

pub struct PlaybackController {
    desktop: Arc<dyn Desktop>,
    factory: Arc<dyn RendererFactory>,
    settings: Settings,
    state: PlaybackState,
    status_tx: watch::Sender<PlaybackStatus>,
    stats: Option<VideoStats>,
    monitor: Option<ResourceMonitor>,
    /// Requested content still waiting for a display
    pending: Option<ContentSource>,
}

impl PlaybackController {
    pub fn new(
        desktop: Arc<dyn Desktop>,
        factory: Arc<dyn RendererFactory>,
        settings: Settings,
    ) -> Self {
        let (status_tx, _) = watch::channel(PlaybackStatus::Idle);
        Self {
            desktop,
            factory,
            settings,
            state: PlaybackState::Idle,
            status_tx,
            stats: None,
            monitor: None,
            pending: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status_tx.subscribe()
    }

    #[cfg(test)]
    pub fn status(&self) -> PlaybackStatus {
        self.status_tx.borrow().clone()
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing(_))
    }

    /// Stop whatever plays and start `source` on the selected display
    pub fn load(&mut self, source: ContentSource) -> Result<()> {
        self.stop();
        self.pending = None;

        let Some(display) =
            select_display(&self.desktop.displays(), self.settings.selected_display)
        else {
            self.pending = Some(source);
            bail!("No display available, waiting for one");
        };
        let content = resolve_content(&source, self.settings.scaling)?;
        log::info!("Loading {:?} on {} ({})", content, display.name, display.id);

        let mut renderer = self.factory.create(content, &display)?;
        apply_renderer_settings(renderer.as_mut(), &self.settings)?;
        renderer.play()?;

        if let Some(frames) = renderer.frames() {
            self.desktop.set_scaling(self.settings.scaling)?;
            self.desktop.attach_video(display.id, frames.clone())?;
            self.stats = Some(VideoStats::new(frames));
        }

        self.state = PlaybackState::Playing(Active {
            source,
            display,
            renderer,
        });
        self.publish();
        Ok(())
    }

    /// Halt and drop the renderer; the window goes back to its still or transparent
    pub fn stop(&mut self) {
        let PlaybackState::Playing(mut active) =
            std::mem::replace(&mut self.state, PlaybackState::Idle)
        else {
            return;
        };

        active.renderer.stop();
        if active.renderer.frames().is_some() {
            crate::log_and_continue!(self.desktop.detach_video(), "detach video");
        }
        log::info!("Stopped playback on {}", active.display.name);

        self.stats = None;
        self.publish();
    }

    /// Forget the requested content and stop
    pub fn clear(&mut self) {
        self.pending = None;
        self.stop();
    }

    /// Apply a new settings snapshot to the live renderer.
    ///
    /// Each change is applied on its own; one failing does not hold back
    /// the others. Only moving to another display reports an error.
    pub fn apply_settings(&mut self, settings: Settings) -> Result<()> {
        let previous = std::mem::replace(&mut self.settings, settings);
        let current = &self.settings;

        if previous.scaling != current.scaling {
            crate::log_and_continue!(self.desktop.set_scaling(current.scaling), "apply scaling");
        }
        if current.show_stats && !previous.show_stats {
            log::info!("System stats enabled");
        }

        let PlaybackState::Playing(active) = &mut self.state else {
            return Ok(());
        };

        if previous.muted != current.muted {
            crate::log_and_continue!(active.renderer.set_muted(current.muted), "apply mute");
        }
        if previous.playback_speed != current.playback_speed {
            crate::log_and_continue!(
                active.renderer.set_rate(current.playback_speed),
                "apply playback speed"
            );
        }
        let cap = bitrate_cap_for_quality(current.quality);
        if bitrate_cap_for_quality(previous.quality) != cap {
            crate::log_and_continue!(active.renderer.set_bitrate_cap(cap), "apply bitrate cap");
        }

        if previous.selected_display != current.selected_display {
            self.retarget()?;
        }
        Ok(())
    }

    /// React to displays coming and going.
    ///
    /// Playback whose display went away moves to the selected or primary
    /// display; with no display left it waits. Waiting content starts as
    /// soon as a display is available.
    pub fn displays_changed(&mut self) -> Result<()> {
        let displays = self.desktop.displays();

        if self.is_playing() {
            if displays.is_empty() {
                let PlaybackState::Playing(active) = &self.state else {
                    return Ok(());
                };
                let source = active.source.clone();
                log::warn!("No display left, playback waits for one");
                self.stop();
                self.pending = Some(source);
                return Ok(());
            }
            return self.retarget();
        }

        match self.pending.take() {
            Some(source) if !displays.is_empty() => {
                log::info!("Display available, starting waiting content");
                self.load(source)
            }
            waiting => {
                self.pending = waiting;
                Ok(())
            }
        }
    }

    /// Move playback to the currently selected display
    fn retarget(&mut self) -> Result<()> {
        let Some(target) = select_display(&self.desktop.displays(), self.settings.selected_display)
        else {
            return Ok(());
        };
        let PlaybackState::Playing(active) = &mut self.state else {
            return Ok(());
        };
        if active.display.id == target.id {
            return Ok(());
        }

        log::info!("Moving playback to {} ({})", target.name, target.id);
        match active.renderer.frames() {
            Some(frames) => {
                self.desktop.attach_video(target.id, frames)?;
                active.display = target;
                self.publish();
                Ok(())
            }
            None => {
                let source = active.source.clone();
                self.load(source)
            }
        }
    }

    /// CPU and memory usage, plus frame counters while a video plays
    pub fn log_stats(&mut self) {
        if !self.settings.show_stats {
            self.monitor = None;
            return;
        }
        self.monitor.get_or_insert_with(ResourceMonitor::new).log();
        if let Some(stats) = self.stats.as_mut() {
            stats.log();
        }
    }

    fn publish(&self) {
        let status = match &self.state {
            PlaybackState::Idle => PlaybackStatus::Idle,
            PlaybackState::Playing(active) => PlaybackStatus::Playing {
                source: active.source.clone(),
                display: Some(active.display.id),
            },
        };
        self.status_tx.send_replace(status);
    }

    /// Follow the content, settings and display channels until one closes
    pub async fn run(
        mut self,
        mut content: watch::Receiver<Option<ContentSource>>,
        mut settings: watch::Receiver<Settings>,
        mut displays: watch::Receiver<Vec<DisplayInfo>>,
        stats_interval: Duration,
    ) {
        let initial_settings = settings.borrow_and_update().clone();
        crate::log_and_continue!(self.apply_settings(initial_settings), "apply settings");

        let initial = content.borrow_and_update().clone();
        if let Some(source) = initial {
            self.load_logged(source);
        }

        let mut ticker = tokio::time::interval(stats_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = content.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let source = content.borrow_and_update().clone();
                    match source {
                        Some(source) => self.load_logged(source),
                        None => self.clear(),
                    }
                }
                changed = settings.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = settings.borrow_and_update().clone();
                    let result = tokio::task::block_in_place(|| self.apply_settings(next));
                    crate::log_and_continue!(result, "apply settings");
                }
                changed = displays.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let result = tokio::task::block_in_place(|| self.displays_changed());
                    crate::log_and_continue!(result, "follow display change");
                }
                _ = ticker.tick() => self.log_stats(),
            }
        }

        self.stop();
        log::info!("Playback controller stopped");
    }

    /// Loading may block on file reads and pipeline state changes
    fn load_logged(&mut self, source: ContentSource) {
        if let Err(e) = tokio::task::block_in_place(|| self.load(source)) {
            log::error!("Failed to load content: {:#}", e);
        }
    }
}

/// Initial settings of a fresh renderer; it is not started when these fail
fn apply_renderer_settings(renderer: &mut dyn Renderer, settings: &Settings) -> Result<()> {
    renderer.set_muted(settings.muted)?;
    renderer.set_bitrate_cap(bitrate_cap_for_quality(settings.quality))?;
    renderer.set_rate(settings.playback_speed)?;
    Ok(())
}
