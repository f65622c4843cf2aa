//! Persona model and consistency rules
//!
//! A persona is the complete identity bundle applied to one browser session.
//! All fields are sampled together so that cross-checks (user agent vs
//! platform, client-hint headers vs platform, GPU class vs texture limits)
//! hold for every persona handed out by the registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::extensions::ExtensionProfile;
use crate::media::{FontProfile, MediaProfile};
use crate::webgl::{CanvasJitter, WebGlProfile};

/// Persona families the registry can draw from.
///
/// Each family fixes the user agent, platform label, vendor string and the
/// header set; everything else is sampled per persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonaFamily {
    ChromeWindows,
    FirefoxWindows,
    ChromeMacOs,
}

impl PersonaFamily {
    /// All configured families, in sampling order.
    pub fn all() -> Vec<PersonaFamily> {
        vec![
            PersonaFamily::ChromeWindows,
            PersonaFamily::FirefoxWindows,
            PersonaFamily::ChromeMacOs,
        ]
    }

    /// Human-readable profile name, persisted with sessions.
    pub fn profile_name(&self) -> &'static str {
        match self {
            PersonaFamily::ChromeWindows => "Chrome on Windows",
            PersonaFamily::FirefoxWindows => "Firefox on Windows",
            PersonaFamily::ChromeMacOs => "Chrome on macOS",
        }
    }

    pub fn user_agent(&self) -> &'static str {
        match self {
            PersonaFamily::ChromeWindows => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
            }
            PersonaFamily::FirefoxWindows => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0"
            }
            PersonaFamily::ChromeMacOs => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
            }
        }
    }

    pub fn platform(&self) -> &'static str {
        match self {
            PersonaFamily::ChromeWindows | PersonaFamily::FirefoxWindows => "Win32",
            PersonaFamily::ChromeMacOs => "MacIntel",
        }
    }

    pub fn vendor(&self) -> &'static str {
        match self {
            PersonaFamily::ChromeWindows | PersonaFamily::ChromeMacOs => "Google Inc.",
            PersonaFamily::FirefoxWindows => "",
        }
    }

    /// Baseline navigation headers for the family.
    pub fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        let common = [
            ("Accept-Encoding", "gzip, deflate, br"),
            ("Sec-Fetch-Dest", "document"),
            ("Sec-Fetch-Mode", "navigate"),
            ("Sec-Fetch-Site", "none"),
            ("Sec-Fetch-User", "?1"),
            ("Upgrade-Insecure-Requests", "1"),
        ];
        for (k, v) in common {
            headers.insert(k.to_string(), v.to_string());
        }

        match self {
            PersonaFamily::ChromeWindows => {
                headers.insert(
                    "Accept".to_string(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7".to_string(),
                );
                headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
                headers.insert(
                    "Sec-Ch-Ua".to_string(),
                    r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#.to_string(),
                );
                headers.insert("Sec-Ch-Ua-Mobile".to_string(), "?0".to_string());
                headers.insert("Sec-Ch-Ua-Platform".to_string(), "\"Windows\"".to_string());
            }
            PersonaFamily::FirefoxWindows => {
                headers.insert(
                    "Accept".to_string(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8".to_string(),
                );
                headers.insert("Accept-Language".to_string(), "en-US,en;q=0.5".to_string());
            }
            PersonaFamily::ChromeMacOs => {
                headers.insert(
                    "Accept".to_string(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7".to_string(),
                );
                headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
                headers.insert(
                    "Sec-Ch-Ua".to_string(),
                    r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#.to_string(),
                );
                headers.insert("Sec-Ch-Ua-Mobile".to_string(), "?0".to_string());
                headers.insert("Sec-Ch-Ua-Platform".to_string(), "\"macOS\"".to_string());
            }
        }

        headers
    }
}

/// Viewport dimensions with device scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// An immutable, internally consistent simulated browser identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub family: PersonaFamily,
    pub user_agent: String,
    pub platform: String,
    pub vendor: String,
    /// Accepted languages, most preferred first. Never empty.
    pub languages: Vec<String>,
    pub headers: HashMap<String, String>,
    pub viewport: Viewport,
    pub screen_width: u32,
    pub screen_height: u32,
    pub timezone: String,
    pub locale: String,
    pub latitude: f64,
    pub longitude: f64,
    pub fonts: Vec<FontProfile>,
    pub media: MediaProfile,
    pub webgl: WebGlProfile,
    pub canvas: CanvasJitter,
    pub extensions: Vec<ExtensionProfile>,
    pub hardware_concurrency: u32,
    pub device_memory: u32,
}

impl Persona {
    /// Check the full consistency predicate.
    ///
    /// A persona failing any check is rejected at sample time and resampled.
    pub fn is_consistent(&self) -> bool {
        self.consistency_violation().is_none()
    }

    /// Returns the first violated consistency rule, if any.
    pub fn consistency_violation(&self) -> Option<&'static str> {
        if self.languages.is_empty() {
            return Some("empty language list");
        }
        if !(2..=32).contains(&self.hardware_concurrency) {
            return Some("hardware concurrency outside [2, 32]");
        }
        if !platform_matches_user_agent(&self.platform, &self.user_agent) {
            return Some("platform label disagrees with user agent OS token");
        }
        if let Some(hint) = self.headers.get("Sec-Ch-Ua-Platform") {
            if !client_hint_matches_platform(hint, &self.platform) {
                return Some("Sec-Ch-Ua-Platform disagrees with platform label");
            }
        }
        if self.webgl.is_mobile_gpu() && self.webgl.max_texture_size > 8192 {
            return Some("mobile GPU with max texture size above 8192");
        }
        None
    }

    /// Canned deterministic persona used when the resampling budget is
    /// exhausted.
    pub fn fallback() -> Persona {
        let family = PersonaFamily::ChromeWindows;
        Persona {
            family,
            user_agent: family.user_agent().to_string(),
            platform: family.platform().to_string(),
            vendor: family.vendor().to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            headers: family.headers(),
            viewport: Viewport {
                width: 1920,
                height: 1080,
                device_scale_factor: 1.0,
            },
            screen_width: 1920,
            screen_height: 1080,
            timezone: "America/New_York".to_string(),
            locale: "en-US".to_string(),
            latitude: 40.7128,
            longitude: -74.0060,
            fonts: crate::media::default_font_list(),
            media: MediaProfile::fallback(),
            webgl: WebGlProfile::fallback(),
            canvas: CanvasJitter::fallback(),
            extensions: Vec::new(),
            hardware_concurrency: 8,
            device_memory: 8,
        }
    }
}

fn platform_matches_user_agent(platform: &str, user_agent: &str) -> bool {
    match platform {
        "Win32" => user_agent.contains("Windows"),
        "MacIntel" => user_agent.contains("Macintosh") || user_agent.contains("Mac OS X"),
        "Linux x86_64" => user_agent.contains("Linux"),
        _ => false,
    }
}

fn client_hint_matches_platform(hint: &str, platform: &str) -> bool {
    let hint = hint.trim_matches('"');
    match platform {
        "Win32" => hint == "Windows",
        "MacIntel" => hint == "macOS",
        "Linux x86_64" => hint == "Linux",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_consistent() {
        let persona = Persona::fallback();
        assert!(persona.is_consistent(), "{:?}", persona.consistency_violation());
    }

    #[test]
    fn fallback_is_deterministic() {
        let a = Persona::fallback();
        let b = Persona::fallback();
        assert_eq!(a.user_agent, b.user_agent);
        assert_eq!(a.viewport, b.viewport);
        assert_eq!(a.hardware_concurrency, b.hardware_concurrency);
    }

    #[test]
    fn family_headers_carry_client_hints_for_chrome_only() {
        assert!(PersonaFamily::ChromeWindows
            .headers()
            .contains_key("Sec-Ch-Ua-Platform"));
        assert!(!PersonaFamily::FirefoxWindows
            .headers()
            .contains_key("Sec-Ch-Ua-Platform"));
    }

    #[test]
    fn empty_languages_rejected() {
        let mut persona = Persona::fallback();
        persona.languages.clear();
        assert_eq!(persona.consistency_violation(), Some("empty language list"));
    }

    #[test]
    fn platform_mismatch_rejected() {
        let mut persona = Persona::fallback();
        persona.platform = "MacIntel".to_string();
        assert!(!persona.is_consistent());
    }

    #[test]
    fn client_hint_mismatch_rejected() {
        let mut persona = Persona::fallback();
        persona
            .headers
            .insert("Sec-Ch-Ua-Platform".to_string(), "\"macOS\"".to_string());
        assert_eq!(
            persona.consistency_violation(),
            Some("Sec-Ch-Ua-Platform disagrees with platform label")
        );
    }

    #[test]
    fn mobile_gpu_texture_limit_enforced() {
        let mut persona = Persona::fallback();
        persona.webgl = WebGlProfile::mobile_for_tests();
        persona.webgl.max_texture_size = 16384;
        assert!(!persona.is_consistent());

        persona.webgl.max_texture_size = 8192;
        assert!(persona.is_consistent());
    }

    #[test]
    fn hardware_concurrency_bounds() {
        let mut persona = Persona::fallback();
        persona.hardware_concurrency = 1;
        assert!(!persona.is_consistent());
        persona.hardware_concurrency = 33;
        assert!(!persona.is_consistent());
        persona.hardware_concurrency = 32;
        assert!(persona.is_consistent());
    }
}
