//! Fingerprint registry
//!
//! Samples complete personas from the configured families and exposes the
//! component-level samplers. The RNG is injected so callers (and tests) can
//! seed it; sampling retries on consistency violations before falling back to
//! the canned default persona.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::extensions::{self, ExtensionProfile};
use crate::media::{self, FontProfile, MediaProfile};
use crate::persona::{Persona, PersonaFamily, Viewport};
use crate::webgl::{self, CanvasJitter, WebGlProfile};

/// How many times a rejected persona is resampled before the canned
/// default is returned.
const RESAMPLE_BUDGET: usize = 8;

const HARDWARE_CONCURRENCY_OPTIONS: &[u32] = &[2, 4, 6, 8, 12, 16];
const DEVICE_MEMORY_OPTIONS: &[u32] = &[2, 4, 8, 16];
const DEVICE_SCALE_OPTIONS: &[f64] = &[1.0, 1.25, 1.5, 2.0];
const SCREEN_RESOLUTIONS: &[(u32, u32)] = &[(1920, 1080), (2560, 1440), (3840, 2160)];

/// Supplies coherent persona bundles and component-level randomizations.
pub struct FingerprintRegistry {
    families: Vec<PersonaFamily>,
    rng: SmallRng,
}

impl FingerprintRegistry {
    /// Create a registry drawing from the given persona families.
    pub fn new(families: Vec<PersonaFamily>) -> Self {
        Self::with_rng(families, SmallRng::from_entropy())
    }

    /// Create a registry with an explicit RNG source, for deterministic
    /// sampling in tests.
    pub fn with_rng(families: Vec<PersonaFamily>, rng: SmallRng) -> Self {
        let families = if families.is_empty() {
            warn!("no persona families configured, using full set");
            PersonaFamily::all()
        } else {
            families
        };
        Self { families, rng }
    }

    /// Sample a fresh, internally consistent persona.
    ///
    /// Rejected candidates are resampled up to the budget; after that the
    /// deterministic fallback persona is returned.
    pub fn sample_persona(&mut self) -> Persona {
        for attempt in 0..RESAMPLE_BUDGET {
            let candidate = self.sample_candidate();
            match candidate.consistency_violation() {
                None => {
                    debug!(
                        family = candidate.family.profile_name(),
                        attempt, "sampled persona"
                    );
                    return candidate;
                }
                Some(rule) => {
                    debug!(attempt, rule, "persona rejected, resampling");
                }
            }
        }

        warn!("persona resampling budget exhausted, using fallback");
        Persona::fallback()
    }

    /// Sample `count` distinct fonts.
    pub fn sample_fonts(&mut self, count: usize) -> Vec<FontProfile> {
        media::sample_fonts(&mut self.rng, count)
    }

    /// Sample a media profile (codecs + enumerated devices).
    pub fn sample_media(&mut self) -> MediaProfile {
        media::sample_media(&mut self.rng)
    }

    /// Sample a WebGL identity.
    pub fn sample_webgl(&mut self) -> WebGlProfile {
        webgl::sample_webgl(&mut self.rng)
    }

    /// Sample canvas jitter parameters.
    pub fn sample_canvas_jitter(&mut self) -> CanvasJitter {
        webgl::sample_canvas_jitter(&mut self.rng)
    }

    /// Sample `count` installed extensions.
    pub fn sample_extensions(&mut self, count: usize) -> Vec<ExtensionProfile> {
        extensions::sample_extensions(&mut self.rng, count)
    }

    fn sample_candidate(&mut self) -> Persona {
        let family = *self
            .families
            .choose(&mut self.rng)
            .unwrap_or(&PersonaFamily::ChromeWindows);

        let (screen_width, screen_height) = *SCREEN_RESOLUTIONS
            .choose(&mut self.rng)
            .unwrap_or(&(1920, 1080));
        let viewport = Viewport {
            width: self.rng.gen_range(1200..=1920),
            height: self.rng.gen_range(800..=1080),
            device_scale_factor: *DEVICE_SCALE_OPTIONS.choose(&mut self.rng).unwrap_or(&1.0),
        };

        let font_count = self.rng.gen_range(18..=28);
        let extension_count = self.rng.gen_range(4..=7);

        Persona {
            family,
            user_agent: family.user_agent().to_string(),
            platform: family.platform().to_string(),
            vendor: family.vendor().to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            headers: family.headers(),
            viewport,
            screen_width,
            screen_height,
            timezone: "America/New_York".to_string(),
            locale: "en-US".to_string(),
            latitude: 40.7128,
            longitude: -74.0060,
            fonts: media::sample_fonts(&mut self.rng, font_count),
            media: media::sample_media(&mut self.rng),
            webgl: webgl::sample_webgl(&mut self.rng),
            canvas: webgl::sample_canvas_jitter(&mut self.rng),
            extensions: extensions::sample_extensions(&mut self.rng, extension_count),
            hardware_concurrency: *HARDWARE_CONCURRENCY_OPTIONS
                .choose(&mut self.rng)
                .unwrap_or(&4),
            device_memory: *DEVICE_MEMORY_OPTIONS.choose(&mut self.rng).unwrap_or(&8),
        }
    }
}

impl Default for FingerprintRegistry {
    fn default() -> Self {
        Self::new(PersonaFamily::all())
    }
}
