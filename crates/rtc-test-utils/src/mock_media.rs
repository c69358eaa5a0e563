//! Mock media capture provider and network probe.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtc_test_utils::{MockMediaProvider, MockNetworkProbe};
//!
//! let media = MockMediaProvider::builder()
//!     .camera(1920, 1080)
//!     .build();
//! let network = MockNetworkProbe::new(25.0);
//! ```

use async_trait::async_trait;
use rtc_session::errors::{MediaError, TransportError};
use rtc_session::negotiator::MediaConstraintProfile;
use rtc_session::transport::{
    DeviceCapabilities, DownlinkEstimate, MediaCaptureProvider, MediaHandle, MediaKind,
    MediaTrack, NetworkProbe, VideoInputCapability,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Mock local media provider.
#[derive(Debug)]
pub struct MockMediaProvider {
    cameras: Vec<VideoInputCapability>,
    acquire_error: Option<MediaError>,
    enumerate_error: Option<MediaError>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    profiles: Mutex<Vec<MediaConstraintProfile>>,
}

impl Default for MockMediaProvider {
    fn default() -> Self {
        Self::builder().camera(1920, 1080).build()
    }
}

impl MockMediaProvider {
    #[must_use]
    pub fn builder() -> MockMediaProviderBuilder {
        MockMediaProviderBuilder::default()
    }

    /// Number of successful acquisitions.
    #[must_use]
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Profiles requested so far, in order.
    #[must_use]
    pub fn requested_profiles(&self) -> Vec<MediaConstraintProfile> {
        self.profiles.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaCaptureProvider for MockMediaProvider {
    async fn acquire_local_media(
        &self,
        profile: &MediaConstraintProfile,
    ) -> Result<MediaHandle, MediaError> {
        self.profiles.lock().unwrap().push(*profile);
        if let Some(error) = &self.acquire_error {
            return Err(error.clone());
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MediaHandle {
            id: format!("local-media-{n}"),
            tracks: vec![
                MediaTrack {
                    id: format!("audio-{n}"),
                    kind: MediaKind::Audio,
                },
                MediaTrack {
                    id: format!("video-{n}"),
                    kind: MediaKind::Video,
                },
            ],
            profile: *profile,
        })
    }

    async fn release_local_media(&self, _handle: &MediaHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn enumerate_devices(&self) -> Result<DeviceCapabilities, MediaError> {
        if let Some(error) = &self.enumerate_error {
            return Err(error.clone());
        }
        Ok(DeviceCapabilities {
            video_inputs: self.cameras.clone(),
            audio_inputs: 1,
        })
    }
}

/// Builder for `MockMediaProvider`.
#[derive(Debug, Default)]
pub struct MockMediaProviderBuilder {
    cameras: Vec<VideoInputCapability>,
    acquire_error: Option<MediaError>,
    enumerate_error: Option<MediaError>,
}

impl MockMediaProviderBuilder {
    /// Add a camera with the given maximum capture size.
    #[must_use]
    pub fn camera(mut self, max_width: u32, max_height: u32) -> Self {
        let device_id = format!("camera-{}", self.cameras.len());
        self.cameras.push(VideoInputCapability {
            device_id,
            max_width,
            max_height,
        });
        self
    }

    /// The user denies camera/microphone access.
    #[must_use]
    pub fn deny_permission(mut self) -> Self {
        self.acquire_error = Some(MediaError::PermissionDenied);
        self
    }

    #[must_use]
    pub fn enumeration_fails(mut self) -> Self {
        self.enumerate_error = Some(MediaError::Failed("enumeration failed".to_string()));
        self
    }

    #[must_use]
    pub fn build(self) -> MockMediaProvider {
        MockMediaProvider {
            cameras: self.cameras,
            acquire_error: self.acquire_error,
            enumerate_error: self.enumerate_error,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            profiles: Mutex::new(Vec::new()),
        }
    }
}

/// Mock downlink probe.
#[derive(Debug, Clone, Copy)]
pub struct MockNetworkProbe {
    mbps: Option<f64>,
}

impl MockNetworkProbe {
    #[must_use]
    pub fn new(mbps: f64) -> Self {
        Self { mbps: Some(mbps) }
    }

    /// Probe that always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self { mbps: None }
    }
}

#[async_trait]
impl NetworkProbe for MockNetworkProbe {
    async fn estimate_downlink(&self) -> Result<DownlinkEstimate, TransportError> {
        self.mbps
            .map(|mbps| DownlinkEstimate { mbps })
            .ok_or_else(|| TransportError::Failed("probe unavailable".to_string()))
    }
}
