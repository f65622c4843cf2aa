//! CAPTCHA detection
//!
//! Scores every known variant from weighted matches across four feature
//! groups: CSS-selector presence, keyword presence in page text, script
//! source patterns, and URL patterns. The variant with the highest confidence
//! wins, provided it reaches its own minimum threshold (matches exactly at
//! the threshold are accepted).

use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::challenge::{CaptchaChallenge, ChallengeVariant};

struct VariantPatterns {
    variant: ChallengeVariant,
    selectors: &'static [(&'static str, f64)],
    keywords: &'static [(&'static str, f64)],
    script_patterns: &'static [(&'static str, f64)],
    url_patterns: &'static [(&'static str, f64)],
    min_confidence: f64,
}

const PATTERNS: &[VariantPatterns] = &[
    VariantPatterns {
        variant: ChallengeVariant::RecaptchaV2,
        selectors: &[(".g-recaptcha", 0.8), ("[data-sitekey]", 0.6), ("#recaptcha", 0.5)],
        keywords: &[("recaptcha", 0.3), ("i'm not a robot", 0.7)],
        script_patterns: &[("www.google.com/recaptcha", 0.8), ("grecaptcha.render", 0.6)],
        url_patterns: &[],
        min_confidence: 0.5,
    },
    VariantPatterns {
        variant: ChallengeVariant::RecaptchaV3,
        selectors: &[],
        keywords: &[("recaptcha", 0.2)],
        script_patterns: &[("grecaptcha.execute", 0.9), ("recaptcha/releases/v3", 0.8)],
        url_patterns: &[],
        min_confidence: 0.6,
    },
    VariantPatterns {
        variant: ChallengeVariant::HCaptcha,
        selectors: &[(".h-captcha", 0.9), ("[data-sitekey]", 0.4)],
        keywords: &[("hcaptcha", 0.5)],
        script_patterns: &[("hcaptcha.com", 0.8), ("hcaptcha.render", 0.7)],
        url_patterns: &[],
        min_confidence: 0.5,
    },
    VariantPatterns {
        variant: ChallengeVariant::Image,
        selectors: &[
            ("img[src*=\"captcha\"]", 0.8),
            ("img[alt*=\"captcha\"]", 0.7),
            (".captcha-image", 0.9),
        ],
        keywords: &[
            ("enter the code", 0.5),
            ("verification code", 0.5),
            ("security code", 0.4),
        ],
        script_patterns: &[],
        url_patterns: &[],
        min_confidence: 0.4,
    },
    VariantPatterns {
        variant: ChallengeVariant::Text,
        selectors: &[(".math-captcha", 0.8), (".text-challenge", 0.7), (".captcha-question", 0.8)],
        keywords: &[
            ("what is", 0.4),
            ("solve", 0.3),
            ("math problem", 0.6),
            ("arithmetic", 0.5),
        ],
        script_patterns: &[],
        url_patterns: &[],
        min_confidence: 0.3,
    },
    VariantPatterns {
        variant: ChallengeVariant::Cloudflare,
        selectors: &[],
        keywords: &[
            ("checking your browser", 0.9),
            ("cloudflare", 0.7),
            ("ddos protection", 0.8),
        ],
        script_patterns: &[("cloudflare.com", 0.8), ("cf-ray", 0.6)],
        url_patterns: &[("cdn-cgi/challenge", 0.6)],
        min_confidence: 0.7,
    },
    VariantPatterns {
        variant: ChallengeVariant::FunCaptcha,
        selectors: &[("#funcaptcha", 0.8), (".funcaptcha", 0.7)],
        keywords: &[],
        script_patterns: &[("funcaptcha", 0.9), ("arkoselabs", 0.8)],
        url_patterns: &[],
        min_confidence: 0.6,
    },
];

/// Detects challenge variants in page content.
pub struct CaptchaDetector;

impl CaptchaDetector {
    pub fn new() -> Self {
        Self
    }

    /// Inspect a response body and return the highest-confidence challenge
    /// reaching its variant threshold, with variant payload extracted.
    pub fn detect(&self, html: &str, page_url: &str) -> Option<CaptchaChallenge> {
        let document = Html::parse_document(html);
        let page_text = document.root_element().text().collect::<String>().to_lowercase();
        let scripts = collect_script_sources(&document);
        let url_lower = page_url.to_lowercase();

        let mut best: Option<(f64, &VariantPatterns, Vec<String>)> = None;

        for patterns in PATTERNS {
            let (confidence, signals) =
                score_variant(patterns, &document, &page_text, &scripts, &url_lower);
            if confidence < patterns.min_confidence {
                continue;
            }
            debug!(
                variant = patterns.variant.as_str(),
                confidence, "variant above threshold"
            );
            let better = match &best {
                Some((best_confidence, _, _)) => confidence > *best_confidence,
                None => true,
            };
            if better {
                best = Some((confidence, patterns, signals));
            }
        }

        let (confidence, patterns, signals) = best?;
        let mut challenge = CaptchaChallenge::new(patterns.variant, confidence, page_url);
        challenge.matched_signals = signals;
        extract_payload(&mut challenge, &document, &scripts);

        info!(
            variant = challenge.variant.as_str(),
            confidence = challenge.confidence,
            page_url,
            "captcha detected"
        );
        Some(challenge)
    }
}

impl Default for CaptchaDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn score_variant(
    patterns: &VariantPatterns,
    document: &Html,
    page_text: &str,
    scripts: &[ScriptSource],
    url_lower: &str,
) -> (f64, Vec<String>) {
    let mut confidence = 0.0;
    let mut signals = Vec::new();

    for (selector_str, weight) in patterns.selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let count = document.select(&selector).count();
        if count > 0 {
            confidence += weight;
            signals.push(format!("selector:{selector_str}:{count}"));
        }
    }

    for (keyword, weight) in patterns.keywords {
        if page_text.contains(keyword) {
            confidence += weight;
            signals.push(format!("keyword:{keyword}"));
        }
    }

    for (pattern, weight) in patterns.script_patterns {
        if scripts.iter().any(|s| s.lower.contains(pattern)) {
            confidence += weight;
            signals.push(format!("script:{pattern}"));
        }
    }

    for (pattern, weight) in patterns.url_patterns {
        if url_lower.contains(pattern) {
            confidence += weight;
            signals.push(format!("url:{pattern}"));
        }
    }

    (confidence, signals)
}

/// A script `src` attribute or inline body, with a lowercased copy for
/// case-insensitive pattern matching. The raw form keeps site-key case.
struct ScriptSource {
    raw: String,
    lower: String,
}

impl ScriptSource {
    fn new(raw: String) -> Self {
        let lower = raw.to_lowercase();
        Self { raw, lower }
    }
}

fn collect_script_sources(document: &Html) -> Vec<ScriptSource> {
    let Ok(selector) = Selector::parse("script") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .flat_map(|script| {
            let mut sources = Vec::new();
            if let Some(src) = script.value().attr("src") {
                sources.push(ScriptSource::new(src.to_string()));
            }
            let body = script.text().collect::<String>();
            if !body.is_empty() {
                sources.push(ScriptSource::new(body));
            }
            sources
        })
        .collect()
}

fn extract_payload(challenge: &mut CaptchaChallenge, document: &Html, scripts: &[ScriptSource]) {
    match challenge.variant {
        ChallengeVariant::RecaptchaV2 => {
            challenge.site_key = attr_of(document, "div.g-recaptcha", "data-sitekey")
                .or_else(|| attr_of(document, "[data-sitekey]", "data-sitekey"));
        }
        ChallengeVariant::RecaptchaV3 => {
            let re = regex::Regex::new(r#"grecaptcha\.execute\(["']([^"']+)["']"#)
                .expect("static regex");
            challenge.site_key = scripts
                .iter()
                .find_map(|s| re.captures(&s.raw).map(|c| c[1].to_string()));
        }
        ChallengeVariant::HCaptcha => {
            challenge.site_key = attr_of(document, "div.h-captcha", "data-sitekey");
        }
        ChallengeVariant::Image => {
            challenge.image_url = attr_of(document, "img[src*=\"captcha\"]", "src")
                .or_else(|| attr_of(document, "img[alt*=\"captcha\"]", "src"));
        }
        ChallengeVariant::Text => {
            challenge.question = first_text(document, "label[for=\"captcha\"]")
                .or_else(|| first_text(document, ".captcha-question"))
                .or_else(|| first_text(document, ".challenge-text"));
        }
        _ => {}
    }
}

fn attr_of(document: &Html, selector_str: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    document
        .select(&selector)
        .find_map(|el| el.value().attr(attr).map(|v| v.to_string()))
}

fn first_text(document: &Html, selector_str: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    document.select(&selector).next().map(|el| {
        el.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(html: &str) -> Option<CaptchaChallenge> {
        CaptchaDetector::new().detect(html, "https://ex.com/search")
    }

    #[test]
    fn clean_page_has_no_challenge() {
        let html = "<html><body><h1>OK</h1></body></html>";
        assert!(detect(html).is_none());
    }

    #[test]
    fn recaptcha_v2_with_site_key() {
        let html = r#"
            <html><body>
                <div class="g-recaptcha" data-sitekey="K"></div>
                <script src="https://www.google.com/recaptcha/api.js"></script>
            </body></html>
        "#;
        let challenge = detect(html).expect("detected");
        assert_eq!(challenge.variant, ChallengeVariant::RecaptchaV2);
        assert_eq!(challenge.site_key.as_deref(), Some("K"));
        assert!(challenge.confidence >= 0.5);
    }

    #[test]
    fn recaptcha_v3_site_key_from_script() {
        let html = r#"
            <html><head>
                <script>grecaptcha.execute('SITE3', {action: 'search'});</script>
                <script src="https://www.google.com/recaptcha/releases/v3.js"></script>
            </head><body></body></html>
        "#;
        let challenge = detect(html).expect("detected");
        assert_eq!(challenge.variant, ChallengeVariant::RecaptchaV3);
        assert_eq!(challenge.site_key.as_deref(), Some("SITE3"));
    }

    #[test]
    fn hcaptcha_detected() {
        let html = r#"
            <html><body>
                <div class="h-captcha" data-sitekey="HK"></div>
                <script src="https://js.hcaptcha.com/1/api.js"></script>
            </body></html>
        "#;
        let challenge = detect(html).expect("detected");
        assert_eq!(challenge.variant, ChallengeVariant::HCaptcha);
        assert_eq!(challenge.site_key.as_deref(), Some("HK"));
    }

    #[test]
    fn image_captcha_extracts_url() {
        let html = r#"
            <html><body>
                <p>Enter the code shown below</p>
                <img class="captcha-image" src="/captcha/img_42.png" alt="captcha">
            </body></html>
        "#;
        let challenge = detect(html).expect("detected");
        assert_eq!(challenge.variant, ChallengeVariant::Image);
        assert_eq!(challenge.image_url.as_deref(), Some("/captcha/img_42.png"));
    }

    #[test]
    fn text_captcha_extracts_question() {
        let html = r#"
            <html><body>
                <div class="captcha-question">What is 3 + 4?</div>
                <input name="captcha">
            </body></html>
        "#;
        let challenge = detect(html).expect("detected");
        assert_eq!(challenge.variant, ChallengeVariant::Text);
        assert_eq!(challenge.question.as_deref(), Some("What is 3 + 4?"));
    }

    #[test]
    fn cloudflare_interstitial() {
        let html = r#"
            <html><head><title>Just a moment...</title></head>
            <body>Checking your browser before accessing ex.com — DDoS protection by Cloudflare</body>
            </html>
        "#;
        let challenge = detect(html).expect("detected");
        assert_eq!(challenge.variant, ChallengeVariant::Cloudflare);
        assert!(challenge.confidence >= 0.7);
    }

    #[test]
    fn funcaptcha_detected() {
        let html = r#"
            <html><body>
                <div id="funcaptcha"></div>
                <script src="https://client-api.arkoselabs.com/v2/api.js"></script>
            </body></html>
        "#;
        let challenge = detect(html).expect("detected");
        assert_eq!(challenge.variant, ChallengeVariant::FunCaptcha);
    }

    #[test]
    fn highest_confidence_variant_wins() {
        // hCaptcha signals dominate even though [data-sitekey] also scores
        // for reCAPTCHA v2.
        let html = r#"
            <html><body>
                <div class="h-captcha" data-sitekey="HK"></div>
                <script src="https://js.hcaptcha.com/1/api.js"></script>
                <p>Protected by hCaptcha</p>
            </body></html>
        "#;
        let challenge = detect(html).expect("detected");
        assert_eq!(challenge.variant, ChallengeVariant::HCaptcha);
    }

    #[test]
    fn confidence_exactly_at_threshold_is_accepted() {
        // Image variant: single keyword "security code" (0.4) meets the 0.4
        // threshold exactly.
        let html = "<html><body><p>Please enter the security code</p></body></html>";
        let challenge = detect(html).expect("detected at threshold");
        assert_eq!(challenge.variant, ChallengeVariant::Image);
        assert!((challenge.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn matched_signals_are_recorded() {
        let html = r#"<div class="g-recaptcha" data-sitekey="K"></div>"#;
        let challenge = detect(html).expect("detected");
        assert!(challenge
            .matched_signals
            .iter()
            .any(|s| s.starts_with("selector:.g-recaptcha")));
    }
}
