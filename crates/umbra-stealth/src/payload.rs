//! Stealth payload rendering
//!
//! Composes the initialization script injected into a browser context before
//! any page script runs. The script aligns every fingerprinting observable
//! with the persona: navigator fields, media devices, codec support, WebGL
//! identity and limits, canvas rendering jitter, and a synthesized `chrome.*`
//! object tree.
//!
//! The script is a versioned template with named `@@SLOT@@` interpolation
//! slots. Tests assert that every slot is substituted and that the composed
//! output is structurally sound.

use serde_json::json;

use crate::persona::Persona;

/// Template version, embedded in the rendered script.
pub const PAYLOAD_VERSION: &str = "3";

const NAVIGATOR_TEMPLATE: &str = r#"
// umbra stealth payload v@@VERSION@@
(function () {
    'use strict';

    delete Object.getPrototypeOf(navigator).webdriver;
    Object.defineProperty(navigator, 'webdriver', { get: function () { return undefined; } });

    Object.defineProperty(navigator, 'platform', { get: function () { return '@@PLATFORM@@'; } });
    Object.defineProperty(navigator, 'vendor', { get: function () { return '@@VENDOR@@'; } });
    Object.defineProperty(navigator, 'languages', { get: function () { return @@LANGUAGES@@; } });
    Object.defineProperty(navigator, 'language', { get: function () { return @@LANGUAGES@@[0]; } });
    Object.defineProperty(navigator, 'hardwareConcurrency', { get: function () { return @@HARDWARE_CONCURRENCY@@; } });
    Object.defineProperty(navigator, 'deviceMemory', { get: function () { return @@DEVICE_MEMORY@@; } });
    Object.defineProperty(navigator, 'connection', { get: function () { return @@CONNECTION@@; } });

    var pluginData = @@PLUGINS@@;
    Object.defineProperty(navigator, 'plugins', { get: function () { return pluginData; } });
    var mimeTypeData = @@MIME_TYPES@@;
    Object.defineProperty(navigator, 'mimeTypes', { get: function () { return mimeTypeData; } });

    Object.defineProperty(window, 'outerWidth', { get: function () { return window.innerWidth; } });
    Object.defineProperty(window, 'outerHeight', { get: function () { return window.innerHeight; } });
    Object.defineProperty(screen, 'width', { get: function () { return @@SCREEN_WIDTH@@; } });
    Object.defineProperty(screen, 'height', { get: function () { return @@SCREEN_HEIGHT@@; } });
    Object.defineProperty(screen, 'availWidth', { get: function () { return @@SCREEN_WIDTH@@; } });
    Object.defineProperty(screen, 'availHeight', { get: function () { return @@SCREEN_HEIGHT@@; } });
    Object.defineProperty(screen, 'availLeft', { get: function () { return 0; } });
    Object.defineProperty(screen, 'availTop', { get: function () { return 0; } });
    Object.defineProperty(screen, 'colorDepth', { get: function () { return 24; } });
    Object.defineProperty(screen, 'pixelDepth', { get: function () { return 24; } });

    if (window.navigator.permissions && window.navigator.permissions.query) {
        var originalQuery = window.navigator.permissions.query.bind(window.navigator.permissions);
        window.navigator.permissions.query = function (parameters) {
            if (parameters && parameters.name === 'notifications') {
                return Promise.resolve({ state: Notification.permission });
            }
            return originalQuery(parameters);
        };
    }
})();
"#;

const MEDIA_TEMPLATE: &str = r#"
(function () {
    'use strict';

    var deviceData = @@MEDIA_DEVICES@@;
    if (navigator.mediaDevices) {
        navigator.mediaDevices.enumerateDevices = function () {
            return Promise.resolve(deviceData.map(function (d) {
                return {
                    deviceId: d.deviceId,
                    kind: d.kind,
                    label: d.label,
                    groupId: d.groupId,
                    toJSON: function () { return d; }
                };
            }));
        };
    }

    var audioCodecs = @@AUDIO_CODECS@@;
    var videoCodecs = @@VIDEO_CODECS@@;
    var originalCanPlayType = HTMLMediaElement.prototype.canPlayType;
    HTMLMediaElement.prototype.canPlayType = function (type) {
        var known = audioCodecs.concat(videoCodecs);
        for (var i = 0; i < known.length; i++) {
            if (type === known[i] || type.indexOf(known[i] + ';') === 0) {
                return 'probably';
            }
        }
        return originalCanPlayType.call(this, type);
    };
})();
"#;

const WEBGL_TEMPLATE: &str = r#"
(function () {
    'use strict';

    var webglParams = @@WEBGL_PARAMS@@;
    var webglExtensions = @@WEBGL_EXTENSIONS@@;

    function patchContext(proto) {
        if (!proto) { return; }

        var originalGetParameter = proto.getParameter;
        proto.getParameter = function (parameter) {
            if (Object.prototype.hasOwnProperty.call(webglParams, parameter)) {
                return webglParams[parameter];
            }
            return originalGetParameter.call(this, parameter);
        };

        var originalGetExtension = proto.getExtension;
        proto.getExtension = function (name) {
            if (name === 'WEBGL_debug_renderer_info') {
                return null;
            }
            return originalGetExtension.call(this, name);
        };

        proto.getSupportedExtensions = function () {
            return webglExtensions.slice();
        };

        var originalReadPixels = proto.readPixels;
        proto.readPixels = function () {
            var result = originalReadPixels.apply(this, arguments);
            var pixels = arguments[6];
            if (pixels && pixels.length) {
                for (var i = 0; i < pixels.length; i++) {
                    if (Math.random() < @@READ_PIXELS_NOISE@@) {
                        pixels[i] = pixels[i] ^ 1;
                    }
                }
            }
            return result;
        };
    }

    patchContext(window.WebGLRenderingContext && window.WebGLRenderingContext.prototype);
    patchContext(window.WebGL2RenderingContext && window.WebGL2RenderingContext.prototype);
})();
"#;

const CANVAS_TEMPLATE: &str = r#"
(function () {
    'use strict';

    var offsetX = @@CANVAS_OFFSET_X@@;
    var offsetY = @@CANVAS_OFFSET_Y@@;
    var measureVariation = @@CANVAS_MEASURE_VARIATION@@;
    var pixelNoise = @@CANVAS_PIXEL_NOISE@@;
    var stampDataUrl = @@CANVAS_STAMP_DATA_URL@@;
    var noiseImageData = @@CANVAS_NOISE_IMAGE_DATA@@;

    function fontSize(ctx) {
        var parsed = parseFloat(ctx.font);
        return isNaN(parsed) ? 16 : parsed;
    }

    function jitter(scale) {
        return (Math.random() * 2 - 1) * scale;
    }

    var proto = CanvasRenderingContext2D.prototype;

    var originalFillText = proto.fillText;
    proto.fillText = function (text, x, y, maxWidth) {
        var size = fontSize(this);
        var nx = x + jitter(size * offsetX);
        var ny = y + jitter(size * offsetY);
        if (maxWidth === undefined) {
            return originalFillText.call(this, text, nx, ny);
        }
        return originalFillText.call(this, text, nx, ny, maxWidth);
    };

    var originalStrokeText = proto.strokeText;
    proto.strokeText = function (text, x, y, maxWidth) {
        var size = fontSize(this);
        var nx = x + jitter(size * offsetX);
        var ny = y + jitter(size * offsetY);
        if (maxWidth === undefined) {
            return originalStrokeText.call(this, text, nx, ny);
        }
        return originalStrokeText.call(this, text, nx, ny, maxWidth);
    };

    var originalMeasureText = proto.measureText;
    proto.measureText = function (text) {
        var metrics = originalMeasureText.call(this, text);
        var factor = 1 + jitter(measureVariation);
        Object.defineProperty(metrics, 'width', { value: metrics.width * factor });
        return metrics;
    };

    if (stampDataUrl) {
        var originalToDataURL = HTMLCanvasElement.prototype.toDataURL;
        HTMLCanvasElement.prototype.toDataURL = function () {
            var ctx = this.getContext('2d');
            if (ctx) {
                ctx.save();
                ctx.fillStyle = 'rgba(' +
                    Math.floor(Math.random() * 255) + ',' +
                    Math.floor(Math.random() * 255) + ',' +
                    Math.floor(Math.random() * 255) + ',' +
                    (Math.random() * 0.005) + ')';
                ctx.fillRect(Math.random() * this.width, Math.random() * this.height, 1, 1);
                ctx.restore();
            }
            return originalToDataURL.apply(this, arguments);
        };
    }

    if (noiseImageData) {
        var originalGetImageData = proto.getImageData;
        proto.getImageData = function () {
            var image = originalGetImageData.apply(this, arguments);
            var amplitude = pixelNoise * 255;
            for (var i = 0; i < image.data.length; i += 4) {
                image.data[i] = Math.min(255, Math.max(0, image.data[i] + jitter(amplitude)));
                image.data[i + 1] = Math.min(255, Math.max(0, image.data[i + 1] + jitter(amplitude)));
                image.data[i + 2] = Math.min(255, Math.max(0, image.data[i + 2] + jitter(amplitude)));
            }
            return image;
        };
    }

    var knownFonts = @@FONTS@@;
    if (document.fonts && document.fonts.check) {
        var originalCheck = document.fonts.check.bind(document.fonts);
        document.fonts.check = function (font, text) {
            for (var i = 0; i < knownFonts.length; i++) {
                if (font.indexOf(knownFonts[i]) !== -1) {
                    return true;
                }
            }
            return originalCheck(font, text);
        };
    }
})();
"#;

const CHROME_TEMPLATE: &str = r#"
(function () {
    'use strict';

    var managementData = @@EXTENSIONS_MANAGEMENT@@;

    function noop() {}
    function asyncValue(value) {
        return function (callback) {
            if (typeof callback === 'function') {
                callback(value);
                return undefined;
            }
            return Promise.resolve(value);
        };
    }

    var chromeTree = {
        runtime: {
            id: undefined,
            connect: function () {
                return {
                    onMessage: { addListener: noop, removeListener: noop },
                    onDisconnect: { addListener: noop, removeListener: noop },
                    postMessage: noop,
                    disconnect: noop
                };
            },
            sendMessage: noop,
            getManifest: function () { return undefined; }
        },
        management: {
            getAll: asyncValue(managementData),
            getSelf: asyncValue(undefined),
            onEnabled: { addListener: noop },
            onDisabled: { addListener: noop }
        },
        storage: {
            local: { get: asyncValue({}), set: noop, remove: noop, clear: noop },
            sync: { get: asyncValue({}), set: noop, remove: noop, clear: noop },
            onChanged: { addListener: noop }
        },
        contextMenus: {
            create: noop,
            update: noop,
            remove: noop,
            removeAll: noop,
            onClicked: { addListener: noop }
        },
        tabs: {
            query: asyncValue([]),
            get: asyncValue(undefined),
            onUpdated: { addListener: noop },
            onRemoved: { addListener: noop }
        },
        webRequest: {
            onBeforeRequest: { addListener: noop, removeListener: noop },
            onCompleted: { addListener: noop, removeListener: noop },
            onErrorOccurred: { addListener: noop, removeListener: noop }
        },
        csi: function () { return {}; },
        loadTimes: function () { return {}; },
        app: { isInstalled: false }
    };

    chromeTree.csi.toString = function () { return 'function csi() { [native code] }'; };
    chromeTree.loadTimes.toString = function () { return 'function loadTimes() { [native code] }'; };

    if (!window.chrome || !window.chrome.runtime) {
        window.chrome = chromeTree;
    }
})();
"#;

/// Render the initialization script for a persona.
///
/// Deterministic for a given persona: all randomness visible to the page
/// comes from `Math.random()` at page runtime, not at render time.
pub fn render_stealth_payload(persona: &Persona) -> String {
    let plugins = json!([
        { "name": "Chrome PDF Plugin", "filename": "internal-pdf-viewer", "description": "Portable Document Format" },
        { "name": "Chrome PDF Viewer", "filename": "mhjfbmdgcfjbbpaeojofohoefgiehjai", "description": "Portable Document Format" },
        { "name": "Native Client", "filename": "internal-nacl-plugin", "description": "Native Client" },
    ]);
    let mime_types = json!([
        { "type": "application/pdf", "suffixes": "pdf", "description": "Portable Document Format" },
        { "type": "text/pdf", "suffixes": "pdf", "description": "Portable Document Format" },
    ]);
    // Derived from hardware values so the shape is stable per persona.
    let connection = json!({
        "downlink": (persona.device_memory as f64).min(10.0),
        "effectiveType": "4g",
        "rtt": 50 + (persona.hardware_concurrency % 8) * 10,
        "saveData": false,
    });

    let devices: Vec<serde_json::Value> = persona
        .media
        .devices
        .iter()
        .map(|d| {
            json!({
                "deviceId": d.device_id,
                "kind": d.kind.as_str(),
                "label": d.label,
                "groupId": d.group_id,
            })
        })
        .collect();

    // GLenum-keyed parameter map: VENDOR/RENDERER/VERSION/SLV, texture and
    // viewport limits, plus the unmasked debug-info pair.
    let webgl_params = json!({
        "7936": persona.webgl.vendor,
        "7937": persona.webgl.renderer,
        "7938": persona.webgl.version,
        "35724": persona.webgl.shading_language_version,
        "3379": persona.webgl.max_texture_size,
        "3386": [persona.webgl.max_viewport_dims, persona.webgl.max_viewport_dims],
        "3414": persona.webgl.depth_bits,
        "3415": persona.webgl.stencil_bits,
        "37445": persona.webgl.vendor,
        "37446": persona.webgl.renderer,
    });

    let management: Vec<serde_json::Value> = persona
        .extensions
        .iter()
        .map(|e| e.management_entry())
        .collect();

    let font_names: Vec<&str> = persona.fonts.iter().map(|f| f.name.as_str()).collect();

    let parts = [
        NAVIGATOR_TEMPLATE
            .replace("@@VERSION@@", PAYLOAD_VERSION)
            .replace("@@PLATFORM@@", &persona.platform)
            .replace("@@VENDOR@@", &persona.vendor)
            .replace("@@LANGUAGES@@", &to_json(&persona.languages))
            .replace(
                "@@HARDWARE_CONCURRENCY@@",
                &persona.hardware_concurrency.to_string(),
            )
            .replace("@@DEVICE_MEMORY@@", &persona.device_memory.to_string())
            .replace("@@CONNECTION@@", &connection.to_string())
            .replace("@@PLUGINS@@", &plugins.to_string())
            .replace("@@MIME_TYPES@@", &mime_types.to_string())
            .replace("@@SCREEN_WIDTH@@", &persona.screen_width.to_string())
            .replace("@@SCREEN_HEIGHT@@", &persona.screen_height.to_string()),
        MEDIA_TEMPLATE
            .replace("@@MEDIA_DEVICES@@", &to_json(&devices))
            .replace("@@AUDIO_CODECS@@", &to_json(&persona.media.audio_codecs))
            .replace("@@VIDEO_CODECS@@", &to_json(&persona.media.video_codecs)),
        WEBGL_TEMPLATE
            .replace("@@WEBGL_PARAMS@@", &webgl_params.to_string())
            .replace("@@WEBGL_EXTENSIONS@@", &to_json(&persona.webgl.extensions))
            .replace("@@READ_PIXELS_NOISE@@", "0.001"),
        CANVAS_TEMPLATE
            .replace(
                "@@CANVAS_OFFSET_X@@",
                &persona.canvas.text_offset_variance.0.to_string(),
            )
            .replace(
                "@@CANVAS_OFFSET_Y@@",
                &persona.canvas.text_offset_variance.1.to_string(),
            )
            .replace(
                "@@CANVAS_MEASURE_VARIATION@@",
                &persona.canvas.text_rendering_variation.to_string(),
            )
            .replace(
                "@@CANVAS_PIXEL_NOISE@@",
                &persona.canvas.pixel_noise_level.to_string(),
            )
            .replace(
                "@@CANVAS_STAMP_DATA_URL@@",
                if persona.canvas.stamp_to_data_url { "true" } else { "false" },
            )
            .replace(
                "@@CANVAS_NOISE_IMAGE_DATA@@",
                if persona.canvas.noise_image_data { "true" } else { "false" },
            )
            .replace("@@FONTS@@", &to_json(&font_names)),
        CHROME_TEMPLATE.replace("@@EXTENSIONS_MANAGEMENT@@", &to_json(&management)),
    ];

    parts.join("\n")
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaFamily;
    use crate::registry::FingerprintRegistry;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn sample() -> Persona {
        let mut registry =
            FingerprintRegistry::with_rng(PersonaFamily::all(), SmallRng::seed_from_u64(2024));
        registry.sample_persona()
    }

    #[test]
    fn every_slot_is_substituted() {
        let payload = render_stealth_payload(&sample());
        assert!(
            !payload.contains("@@"),
            "unsubstituted template slot in payload"
        );
    }

    #[test]
    fn delimiters_balance() {
        let payload = render_stealth_payload(&sample());
        for (open, close) in [('{', '}'), ('(', ')'), ('[', ']')] {
            let opens = payload.matches(open).count();
            let closes = payload.matches(close).count();
            assert_eq!(opens, closes, "unbalanced {open}{close} pair");
        }
    }

    #[test]
    fn spec_overrides_present() {
        let payload = render_stealth_payload(&sample());
        for needle in [
            "webdriver",
            "'platform'",
            "'languages'",
            "'hardwareConcurrency'",
            "'deviceMemory'",
            "'connection'",
            "'plugins'",
            "'mimeTypes'",
            "enumerateDevices",
            "canPlayType",
            "getParameter",
            "WEBGL_debug_renderer_info",
            "getSupportedExtensions",
            "readPixels",
            "fillText",
            "strokeText",
            "measureText",
            "toDataURL",
            "getImageData",
            "window.chrome",
        ] {
            assert!(payload.contains(needle), "missing override: {needle}");
        }
    }

    #[test]
    fn chrome_tree_has_required_namespaces() {
        let payload = render_stealth_payload(&sample());
        for ns in ["runtime:", "management:", "storage:", "contextMenus:", "tabs:", "webRequest:"] {
            assert!(payload.contains(ns), "missing chrome namespace: {ns}");
        }
    }

    #[test]
    fn persona_values_are_embedded() {
        let persona = sample();
        let payload = render_stealth_payload(&persona);
        assert!(payload.contains(&persona.platform));
        assert!(payload.contains(&persona.webgl.renderer));
        assert!(payload.contains(&persona.screen_width.to_string()));
        if let Some(ext) = persona.extensions.first() {
            assert!(payload.contains(&ext.id));
        }
    }

    #[test]
    fn render_is_deterministic_per_persona() {
        let persona = sample();
        assert_eq!(
            render_stealth_payload(&persona),
            render_stealth_payload(&persona)
        );
    }

    #[test]
    fn version_marker_present() {
        let payload = render_stealth_payload(&Persona::fallback());
        assert!(payload.contains(&format!("stealth payload v{PAYLOAD_VERSION}")));
    }
}
