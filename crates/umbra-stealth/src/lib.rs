//! # Umbra Stealth
//!
//! Persona generation and fingerprint countermeasures for browser automation.
//! A [`Persona`] is an immutable bundle describing one simulated browser
//! identity: user agent, platform, headers, viewport, fonts, media devices,
//! WebGL/canvas characteristics, extensions and hardware values. The
//! [`FingerprintRegistry`] samples internally consistent personas and renders
//! the JavaScript payload that aligns in-page observables with the persona
//! before any page script runs.
//!
//! ## Usage
//!
//! ```rust
//! use umbra_stealth::{FingerprintRegistry, PersonaFamily};
//!
//! let mut registry = FingerprintRegistry::new(PersonaFamily::all());
//! let persona = registry.sample_persona();
//! let payload = umbra_stealth::render_stealth_payload(&persona);
//! assert!(payload.contains("webdriver"));
//! ```

pub mod extensions;
pub mod media;
pub mod payload;
pub mod persona;
pub mod registry;
pub mod webgl;

pub use extensions::ExtensionProfile;
pub use media::{FontProfile, MediaDevice, MediaDeviceKind, MediaProfile};
pub use payload::{render_stealth_payload, PAYLOAD_VERSION};
pub use persona::{Persona, PersonaFamily, Viewport};
pub use registry::FingerprintRegistry;
pub use webgl::{CanvasJitter, WebGlProfile};

/// The version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
