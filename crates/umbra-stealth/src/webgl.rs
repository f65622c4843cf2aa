//! WebGL and canvas fingerprint profiles
//!
//! WebGL identity (vendor, renderer, limits, extension list) and the canvas
//! jitter parameters that perturb text rendering and pixel reads. GPU entries
//! come in two classes: desktop parts with 16384 texture limits and mobile
//! parts (ARM Mali, Qualcomm Adreno) capped at 8192.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// WebGL identity exposed through `getParameter` and extension queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebGlProfile {
    pub vendor: String,
    pub renderer: String,
    pub version: String,
    pub shading_language_version: String,
    pub extensions: Vec<String>,
    /// Named numeric/string parameters reported by `getParameter`.
    pub parameters: HashMap<String, String>,
    pub max_texture_size: u32,
    pub max_viewport_dims: u32,
    pub depth_bits: u8,
    pub stencil_bits: u8,
}

impl WebGlProfile {
    /// Whether the GPU belongs to a mobile part family.
    pub fn is_mobile_gpu(&self) -> bool {
        let vendor = self.vendor.to_lowercase();
        let renderer = self.renderer.to_lowercase();
        ["arm", "qualcomm"].iter().any(|v| vendor.contains(v))
            || ["mali", "adreno"].iter().any(|r| renderer.contains(r))
    }

    /// Deterministic desktop profile for the canned fallback persona.
    pub fn fallback() -> Self {
        gpu_config_to_profile(&GPU_CONFIGS[0], DEFAULT_EXTENSIONS.len())
    }

    #[cfg(test)]
    pub fn mobile_for_tests() -> Self {
        gpu_config_to_profile(&GPU_CONFIGS[3], 15)
    }
}

/// Canvas rendering jitter parameters.
///
/// `text_offset_variance` scales the random sub-pixel offset applied per
/// draw; `text_rendering_variation` bounds the multiplicative error on
/// `measureText` widths; `pixel_noise_level` bounds per-pixel RGB noise on
/// `getImageData` output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CanvasJitter {
    pub text_offset_variance: (f64, f64),
    pub text_rendering_variation: f64,
    pub pixel_noise_level: f64,
    pub timing_variation: f64,
    pub stamp_to_data_url: bool,
    pub noise_image_data: bool,
}

impl CanvasJitter {
    pub fn fallback() -> Self {
        Self {
            text_offset_variance: (0.005, 0.005),
            text_rendering_variation: 0.08,
            pixel_noise_level: 0.004,
            timing_variation: 0.25,
            stamp_to_data_url: true,
            noise_image_data: true,
        }
    }
}

struct GpuConfig {
    vendor: &'static str,
    renderer: &'static str,
    max_texture_size: u32,
}

const GPU_CONFIGS: &[GpuConfig] = &[
    GpuConfig {
        vendor: "Intel Inc.",
        renderer: "Intel Iris OpenGL Engine",
        max_texture_size: 16384,
    },
    GpuConfig {
        vendor: "NVIDIA Corporation",
        renderer: "NVIDIA GeForce GTX 1080 OpenGL Engine",
        max_texture_size: 16384,
    },
    GpuConfig {
        vendor: "ATI Technologies Inc.",
        renderer: "AMD Radeon Pro 560 OpenGL Engine",
        max_texture_size: 16384,
    },
    GpuConfig {
        vendor: "ARM",
        renderer: "Mali-T860",
        max_texture_size: 8192,
    },
    GpuConfig {
        vendor: "Qualcomm",
        renderer: "Adreno (TM) 540",
        max_texture_size: 8192,
    },
];

const DEFAULT_EXTENSIONS: &[&str] = &[
    "ANGLE_instanced_arrays",
    "EXT_blend_minmax",
    "EXT_color_buffer_half_float",
    "EXT_disjoint_timer_query",
    "EXT_float_blend",
    "EXT_frag_depth",
    "EXT_shader_texture_lod",
    "EXT_texture_compression_bptc",
    "EXT_texture_compression_rgtc",
    "EXT_texture_filter_anisotropic",
    "EXT_sRGB",
    "KHR_parallel_shader_compile",
    "OES_element_index_uint",
    "OES_fbo_render_mipmap",
    "OES_standard_derivatives",
    "OES_texture_float",
    "OES_texture_float_linear",
    "OES_texture_half_float",
    "OES_texture_half_float_linear",
    "OES_vertex_array_object",
    "WEBGL_color_buffer_float",
    "WEBGL_compressed_texture_s3tc",
    "WEBGL_compressed_texture_s3tc_srgb",
    "WEBGL_debug_shaders",
    "WEBGL_depth_texture",
    "WEBGL_draw_buffers",
    "WEBGL_lose_context",
];

fn gpu_config_to_profile(config: &GpuConfig, extension_count: usize) -> WebGlProfile {
    let extensions: Vec<String> = DEFAULT_EXTENSIONS
        .iter()
        .take(extension_count)
        .map(|e| e.to_string())
        .collect();
    build_profile(config, extensions)
}

fn build_profile(config: &GpuConfig, extensions: Vec<String>) -> WebGlProfile {
    let mut parameters = HashMap::new();
    parameters.insert("VERSION".to_string(), "WebGL 1.0".to_string());
    parameters.insert(
        "SHADING_LANGUAGE_VERSION".to_string(),
        "WebGL GLSL ES 1.0".to_string(),
    );
    parameters.insert("VENDOR".to_string(), config.vendor.to_string());
    parameters.insert("RENDERER".to_string(), config.renderer.to_string());
    parameters.insert(
        "MAX_TEXTURE_SIZE".to_string(),
        config.max_texture_size.to_string(),
    );
    parameters.insert(
        "MAX_VIEWPORT_DIMS".to_string(),
        config.max_texture_size.to_string(),
    );
    parameters.insert("RED_BITS".to_string(), "8".to_string());
    parameters.insert("GREEN_BITS".to_string(), "8".to_string());
    parameters.insert("BLUE_BITS".to_string(), "8".to_string());
    parameters.insert("ALPHA_BITS".to_string(), "8".to_string());
    parameters.insert("DEPTH_BITS".to_string(), "24".to_string());
    parameters.insert("STENCIL_BITS".to_string(), "0".to_string());

    WebGlProfile {
        vendor: config.vendor.to_string(),
        renderer: config.renderer.to_string(),
        version: "WebGL 1.0".to_string(),
        shading_language_version: "WebGL GLSL ES 1.0".to_string(),
        extensions,
        parameters,
        max_texture_size: config.max_texture_size,
        max_viewport_dims: config.max_texture_size,
        depth_bits: 24,
        stencil_bits: 0,
    }
}

/// Sample a WebGL profile: random GPU from the table plus a random subset of
/// the extension catalog (at least 15 entries).
pub fn sample_webgl(rng: &mut SmallRng) -> WebGlProfile {
    let config = GPU_CONFIGS
        .choose(rng)
        .unwrap_or(&GPU_CONFIGS[0]);
    let extension_count = rng.gen_range(15..=DEFAULT_EXTENSIONS.len());
    let extensions = DEFAULT_EXTENSIONS
        .choose_multiple(rng, extension_count)
        .map(|e| e.to_string())
        .collect();
    build_profile(config, extensions)
}

/// Sample canvas jitter parameters within realistic bands.
pub fn sample_canvas_jitter(rng: &mut SmallRng) -> CanvasJitter {
    CanvasJitter {
        text_offset_variance: (rng.gen_range(0.001..=0.01), rng.gen_range(0.001..=0.01)),
        text_rendering_variation: rng.gen_range(0.05..=0.15),
        pixel_noise_level: rng.gen_range(0.001..=0.01),
        timing_variation: rng.gen_range(0.1..=0.5),
        stamp_to_data_url: rng.gen_bool(0.5),
        noise_image_data: rng.gen_bool(0.5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn mobile_gpus_never_exceed_mobile_texture_limit() {
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..64 {
            let profile = sample_webgl(&mut rng);
            if profile.is_mobile_gpu() {
                assert!(profile.max_texture_size <= 8192);
            } else {
                assert_eq!(profile.max_texture_size, 16384);
            }
        }
    }

    #[test]
    fn parameters_agree_with_identity() {
        let mut rng = SmallRng::seed_from_u64(3);
        let profile = sample_webgl(&mut rng);
        assert_eq!(profile.parameters.get("VENDOR"), Some(&profile.vendor));
        assert_eq!(profile.parameters.get("RENDERER"), Some(&profile.renderer));
        assert_eq!(
            profile.parameters.get("MAX_TEXTURE_SIZE"),
            Some(&profile.max_texture_size.to_string())
        );
    }

    #[test]
    fn extension_count_within_bounds() {
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..32 {
            let profile = sample_webgl(&mut rng);
            assert!(profile.extensions.len() >= 15);
            assert!(profile.extensions.len() <= DEFAULT_EXTENSIONS.len());
        }
    }

    #[test]
    fn debug_renderer_info_never_advertised() {
        // The payload returns null for WEBGL_debug_renderer_info; keeping it
        // out of the advertised list avoids an inconsistency probes look for.
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..32 {
            let profile = sample_webgl(&mut rng);
            assert!(!profile
                .extensions
                .iter()
                .any(|e| e == "WEBGL_debug_renderer_info"));
        }
    }

    #[test]
    fn jitter_bands() {
        let mut rng = SmallRng::seed_from_u64(9);
        for _ in 0..32 {
            let jitter = sample_canvas_jitter(&mut rng);
            assert!((0.05..=0.15).contains(&jitter.text_rendering_variation));
            assert!((0.001..=0.01).contains(&jitter.pixel_noise_level));
            assert!((0.001..=0.01).contains(&jitter.text_offset_variance.0));
        }
    }
}
