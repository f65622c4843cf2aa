//! Font and media device profiles
//!
//! Fingerprinting surfaces that enumerate system resources: installed fonts,
//! media input/output devices, and codec support. The catalogs mirror what a
//! stock desktop browser would report.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single font the persona claims to have installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontProfile {
    pub name: String,
    pub generic_family: String,
    pub is_monospace: bool,
    pub is_serif: bool,
}

impl FontProfile {
    fn new(name: &str, generic_family: &str, is_monospace: bool, is_serif: bool) -> Self {
        Self {
            name: name.to_string(),
            generic_family: generic_family.to_string(),
            is_monospace,
            is_serif,
        }
    }
}

/// Kinds reported by `navigator.mediaDevices.enumerateDevices()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

impl MediaDeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDeviceKind::AudioInput => "audioinput",
            MediaDeviceKind::AudioOutput => "audiooutput",
            MediaDeviceKind::VideoInput => "videoinput",
        }
    }
}

/// One entry of the enumerated device list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDevice {
    pub device_id: String,
    pub kind: MediaDeviceKind,
    pub label: String,
    pub group_id: String,
}

/// Media capabilities of a persona: devices plus supported codecs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProfile {
    pub audio_codecs: Vec<String>,
    pub video_codecs: Vec<String>,
    pub devices: Vec<MediaDevice>,
}

impl MediaProfile {
    /// Deterministic profile for the canned fallback persona.
    pub fn fallback() -> Self {
        Self {
            audio_codecs: vec![
                "audio/mp3".to_string(),
                "audio/mp4".to_string(),
                "audio/ogg".to_string(),
                "audio/wav".to_string(),
            ],
            video_codecs: vec![
                "video/mp4".to_string(),
                "video/webm".to_string(),
                "video/ogg".to_string(),
            ],
            devices: vec![
                MediaDevice {
                    device_id: "default".to_string(),
                    kind: MediaDeviceKind::AudioInput,
                    label: "Default - Microphone".to_string(),
                    group_id: "default".to_string(),
                },
                MediaDevice {
                    device_id: "default".to_string(),
                    kind: MediaDeviceKind::AudioOutput,
                    label: "Default - Speakers".to_string(),
                    group_id: "default".to_string(),
                },
            ],
        }
    }
}

const AUDIO_CODECS: &[&str] = &[
    "audio/mp3",
    "audio/mp4",
    "audio/aac",
    "audio/ogg",
    "audio/wav",
    "audio/webm",
    "audio/flac",
    "audio/x-m4a",
    "audio/x-aac",
    "audio/x-wav",
];

const VIDEO_CODECS: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-flv",
    "video/3gpp",
    "video/3gpp2",
    "video/h264",
    "video/x-m4v",
];

/// Fonts commonly present on desktop platforms. Personas report a random
/// subset so no two sessions enumerate the same list.
pub fn font_catalog() -> Vec<FontProfile> {
    vec![
        FontProfile::new("Arial", "sans-serif", false, false),
        FontProfile::new("Helvetica", "sans-serif", false, false),
        FontProfile::new("Times New Roman", "serif", false, true),
        FontProfile::new("Times", "serif", false, true),
        FontProfile::new("Courier New", "monospace", true, false),
        FontProfile::new("Courier", "monospace", true, false),
        FontProfile::new("Verdana", "sans-serif", false, false),
        FontProfile::new("Georgia", "serif", false, true),
        FontProfile::new("Palatino", "serif", false, true),
        FontProfile::new("Garamond", "serif", false, true),
        FontProfile::new("Comic Sans MS", "sans-serif", false, false),
        FontProfile::new("Trebuchet MS", "sans-serif", false, false),
        FontProfile::new("Arial Black", "sans-serif", false, false),
        FontProfile::new("Impact", "sans-serif", false, false),
        FontProfile::new("Lucida Console", "monospace", true, false),
        FontProfile::new("Lucida Sans Unicode", "sans-serif", false, false),
        FontProfile::new("Tahoma", "sans-serif", false, false),
        FontProfile::new("Segoe UI", "sans-serif", false, false),
        FontProfile::new("Geneva", "sans-serif", false, false),
        FontProfile::new("Calibri", "sans-serif", false, false),
        FontProfile::new("Candara", "sans-serif", false, false),
        FontProfile::new("Optima", "sans-serif", false, false),
        FontProfile::new("Futura", "sans-serif", false, false),
        FontProfile::new("Gill Sans", "sans-serif", false, false),
        FontProfile::new("Franklin Gothic", "sans-serif", false, false),
        FontProfile::new("Myriad Pro", "sans-serif", false, false),
        FontProfile::new("Lucida Grande", "sans-serif", false, false),
        FontProfile::new("Century Gothic", "sans-serif", false, false),
        FontProfile::new("Osaka", "sans-serif", false, false),
        FontProfile::new("Meiryo", "sans-serif", false, false),
        FontProfile::new("Yu Gothic", "sans-serif", false, false),
        FontProfile::new("Hiragino Kaku Gothic Pro", "sans-serif", false, false),
        FontProfile::new("Hiragino Mincho Pro", "serif", false, true),
        FontProfile::new("MS Gothic", "monospace", true, false),
        FontProfile::new("Microsoft YaHei", "sans-serif", false, false),
        FontProfile::new("SimSun", "serif", false, true),
    ]
}

/// Deterministic slice of the catalog for the fallback persona.
pub fn default_font_list() -> Vec<FontProfile> {
    font_catalog().into_iter().take(20).collect()
}

/// Sample `count` distinct fonts from the catalog.
pub fn sample_fonts(rng: &mut SmallRng, count: usize) -> Vec<FontProfile> {
    let catalog = font_catalog();
    let count = count.min(catalog.len());
    catalog.choose_multiple(rng, count).cloned().collect()
}

/// Sample a media profile: 3-6 codecs of each kind plus a synthesized
/// device list with realistic labels and random device/group ids.
pub fn sample_media(rng: &mut SmallRng) -> MediaProfile {
    let audio_count = rng.gen_range(3..=6);
    let video_count = rng.gen_range(3..=6);

    let audio_codecs = AUDIO_CODECS
        .choose_multiple(rng, audio_count)
        .map(|c| c.to_string())
        .collect();
    let video_codecs = VIDEO_CODECS
        .choose_multiple(rng, video_count)
        .map(|c| c.to_string())
        .collect();

    let mut devices = Vec::new();
    for (kind, label) in [
        (MediaDeviceKind::AudioInput, "Default - Microphone"),
        (MediaDeviceKind::AudioInput, "Built-in Microphone"),
        (MediaDeviceKind::AudioOutput, "Default - Speakers"),
        (MediaDeviceKind::AudioOutput, "Built-in Speakers"),
        (MediaDeviceKind::VideoInput, "FaceTime HD Camera"),
        (MediaDeviceKind::VideoInput, "USB Camera"),
    ] {
        devices.push(MediaDevice {
            device_id: random_token(rng, 32),
            kind,
            label: label.to_string(),
            group_id: random_token(rng, 16),
        });
    }

    MediaProfile {
        audio_codecs,
        video_codecs,
        devices,
    }
}

const TOKEN_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub(crate) fn random_token(rng: &mut SmallRng, len: usize) -> String {
    (0..len)
        .map(|_| TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn sampled_fonts_are_distinct_and_bounded() {
        let mut rng = SmallRng::seed_from_u64(7);
        let fonts = sample_fonts(&mut rng, 20);
        assert_eq!(fonts.len(), 20);

        // Oversized requests clamp to the catalog size.
        let all = sample_fonts(&mut rng, 10_000);
        assert_eq!(all.len(), font_catalog().len());
    }

    #[test]
    fn media_profile_has_all_device_kinds() {
        let mut rng = SmallRng::seed_from_u64(7);
        let media = sample_media(&mut rng);

        assert!((3..=6).contains(&media.audio_codecs.len()));
        assert!((3..=6).contains(&media.video_codecs.len()));
        for kind in [
            MediaDeviceKind::AudioInput,
            MediaDeviceKind::AudioOutput,
            MediaDeviceKind::VideoInput,
        ] {
            assert!(media.devices.iter().any(|d| d.kind == kind));
        }
    }

    #[test]
    fn device_ids_look_random() {
        let mut rng = SmallRng::seed_from_u64(7);
        let media = sample_media(&mut rng);
        let ids: Vec<&str> = media.devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids.len(), 6);
        assert!(ids.iter().all(|id| id.len() == 32));
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn seeded_sampling_is_deterministic() {
        let mut a = SmallRng::seed_from_u64(42);
        let mut b = SmallRng::seed_from_u64(42);
        assert_eq!(sample_fonts(&mut a, 10), sample_fonts(&mut b, 10));
    }
}
