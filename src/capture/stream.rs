use anyhow::{anyhow, Result};
use image::RgbaImage;

use super::ledger::{LedgerToken, ResourceKind, ResourceLedger};

/// Produces camera frames for a video track.
pub trait FrameGrabber: Send {
    fn grab(&mut self) -> Result<RgbaImage>;

    /// Human-readable device description for logs.
    fn describe(&self) -> String;

    /// Release the underlying device. Called once when the track stops.
    fn stop(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

pub struct MediaTrack {
    kind: TrackKind,
    label: String,
    state: TrackState,
    grabber: Option<Box<dyn FrameGrabber>>,
}

impl MediaTrack {
    pub fn video(grabber: Box<dyn FrameGrabber>) -> Self {
        Self {
            kind: TrackKind::Video,
            label: grabber.describe(),
            state: TrackState::Live,
            grabber: Some(grabber),
        }
    }

    /// A track with no frame source, e.g. audio a device handed back unasked.
    pub fn audio(label: impl Into<String>) -> Self {
        Self {
            kind: TrackKind::Audio,
            label: label.into(),
            state: TrackState::Live,
            grabber: None,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == TrackState::Live
    }

    pub fn next_frame(&mut self) -> Result<RgbaImage> {
        if !self.is_live() {
            return Err(anyhow!("track '{}' has ended", self.label));
        }
        match self.grabber.as_mut() {
            Some(grabber) => grabber.grab(),
            None => Err(anyhow!("track '{}' carries no video", self.label)),
        }
    }

    pub fn stop(&mut self) {
        if self.state == TrackState::Ended {
            return;
        }
        self.state = TrackState::Ended;
        if let Some(mut grabber) = self.grabber.take() {
            grabber.stop();
        }
        log::debug!("track '{}' stopped", self.label);
    }
}

/// A set of tracks handed out by a [`DeviceProvider`](super::DeviceProvider).
///
/// Counted in the provider's ledger while any track may still be live.
/// Dropping the stream stops its tracks.
pub struct MediaStream {
    tracks: Vec<MediaTrack>,
    token: Option<LedgerToken>,
}

impl MediaStream {
    pub fn new(ledger: &ResourceLedger, tracks: Vec<MediaTrack>) -> Self {
        Self {
            tracks,
            token: Some(ledger.track(ResourceKind::Stream)),
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some() && self.tracks.iter().any(MediaTrack::is_live)
    }

    /// Index of the first live video track.
    pub fn video_track_index(&self) -> Option<usize> {
        self.tracks
            .iter()
            .position(|t| t.kind() == TrackKind::Video && t.is_live())
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut MediaTrack> {
        self.tracks.get_mut(index)
    }

    pub fn stop(&mut self) {
        for track in &mut self.tracks {
            track.stop();
        }
        self.token = None;
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Flat {
        stopped: Arc<AtomicBool>,
    }

    impl FrameGrabber for Flat {
        fn grab(&mut self) -> Result<RgbaImage> {
            Ok(RgbaImage::new(4, 4))
        }

        fn describe(&self) -> String {
            "flat".to_string()
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn dropping_stream_stops_tracks_and_releases_ledger() {
        let ledger = ResourceLedger::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let mut stream = MediaStream::new(
            &ledger,
            vec![MediaTrack::video(Box::new(Flat {
                stopped: Arc::clone(&stopped),
            }))],
        );
        assert!(stream.is_active());
        let index = stream.video_track_index().unwrap();
        assert_eq!(stream.track_mut(index).unwrap().next_frame().unwrap().width(), 4);
        assert_eq!(ledger.live(ResourceKind::Stream), 1);

        drop(stream);
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(ledger.live(ResourceKind::Stream), 0);
    }

    #[test]
    fn audio_only_stream_has_no_video_track() {
        let ledger = ResourceLedger::new();
        let stream = MediaStream::new(&ledger, vec![MediaTrack::audio("mic")]);
        assert!(stream.video_track_index().is_none());
    }

    #[test]
    fn ended_track_refuses_frames() {
        let mut track = MediaTrack::video(Box::new(Flat {
            stopped: Arc::new(AtomicBool::new(false)),
        }));
        track.stop();
        track.stop();
        assert!(track.next_frame().is_err());
    }
}
