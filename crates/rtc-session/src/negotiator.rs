//! Capability Negotiator.
//!
//! Picks the session's media constraints once, at start:
//!
//! | Condition                                          | Profile              |
//! |----------------------------------------------------|----------------------|
//! | requested Low, or network Poor, or device < 720p   | 640x480 @ 15         |
//! | requested High, network Excellent, device ≥ 720p   | 1920x1080 @ 30 (≤60) |
//! | otherwise                                          | 1280x720 @ 30        |

use crate::observability::metrics;
use crate::transport::{MediaCaptureProvider, NetworkProbe};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Requested quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl QualityTier {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        }
    }
}

/// Probed network quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl NetworkQuality {
    /// ≥10 Mbps Excellent, ≥5 Good, ≥2 Fair, else Poor.
    #[must_use]
    pub fn from_downlink_mbps(mbps: f64) -> Self {
        if mbps >= 10.0 {
            NetworkQuality::Excellent
        } else if mbps >= 5.0 {
            NetworkQuality::Good
        } else if mbps >= 2.0 {
            NetworkQuality::Fair
        } else {
            NetworkQuality::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub max_frame_rate: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Media parameters requested from the capture provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraintProfile {
    pub tier: QualityTier,
    pub video: VideoConstraints,
    pub audio: AudioConstraints,
}

impl MediaConstraintProfile {
    #[must_use]
    pub fn low() -> Self {
        Self {
            tier: QualityTier::Low,
            video: VideoConstraints {
                width: 640,
                height: 480,
                frame_rate: 15,
                max_frame_rate: None,
            },
            audio: AudioConstraints::default(),
        }
    }

    #[must_use]
    pub fn standard() -> Self {
        Self {
            tier: QualityTier::Medium,
            video: VideoConstraints {
                width: 1280,
                height: 720,
                frame_rate: 30,
                max_frame_rate: None,
            },
            audio: AudioConstraints::default(),
        }
    }

    #[must_use]
    pub fn high() -> Self {
        Self {
            tier: QualityTier::High,
            video: VideoConstraints {
                width: 1920,
                height: 1080,
                frame_rate: 30,
                max_frame_rate: Some(60),
            },
            audio: AudioConstraints::default(),
        }
    }
}

/// Pure constraint decision.
#[must_use]
pub fn choose_constraints(
    requested: QualityTier,
    network: NetworkQuality,
    device_capable: bool,
) -> MediaConstraintProfile {
    if requested == QualityTier::Low || network == NetworkQuality::Poor || !device_capable {
        MediaConstraintProfile::low()
    } else if requested == QualityTier::High && network == NetworkQuality::Excellent {
        MediaConstraintProfile::high()
    } else {
        MediaConstraintProfile::standard()
    }
}

/// Probes device and network, then applies [`choose_constraints`].
#[derive(Clone)]
pub struct CapabilityNegotiator {
    media: Arc<dyn MediaCaptureProvider>,
    network: Arc<dyn NetworkProbe>,
}

impl CapabilityNegotiator {
    #[must_use]
    pub fn new(media: Arc<dyn MediaCaptureProvider>, network: Arc<dyn NetworkProbe>) -> Self {
        Self { media, network }
    }

    /// Probe failures fall back (network Fair, device not capable); this never fails.
    pub async fn negotiate(&self, requested: QualityTier) -> MediaConstraintProfile {
        let network = match self.network.estimate_downlink().await {
            Ok(estimate) => NetworkQuality::from_downlink_mbps(estimate.mbps),
            Err(e) => {
                warn!(
                    target: "rtc.negotiator",
                    error = %e,
                    "Network probe failed, assuming fair network"
                );
                NetworkQuality::Fair
            }
        };

        let device_capable = match self.media.enumerate_devices().await {
            Ok(caps) => caps.supports_high_quality(),
            Err(e) => {
                warn!(
                    target: "rtc.negotiator",
                    error = %e,
                    "Device enumeration failed, assuming no HD capture"
                );
                false
            }
        };

        let profile = choose_constraints(requested, network, device_capable);
        metrics::record_media_profile(profile.tier.as_str());
        info!(
            target: "rtc.negotiator",
            requested = requested.as_str(),
            network = ?network,
            device_capable = device_capable,
            width = profile.video.width,
            height = profile.video.height,
            frame_rate = profile.video.frame_rate,
            "Media constraints chosen"
        );
        profile
    }
}
