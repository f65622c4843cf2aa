//! Installed-extension simulation
//!
//! A realistic Chrome install carries a handful of extensions; a profile with
//! none is itself a signal. The catalog holds real Web Store records, and the
//! manifest/management projections feed the synthesized `chrome.*` tree in
//! the stealth payload.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One simulated installed extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionProfile {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub permissions: Vec<String>,
    pub enabled: bool,
}

impl ExtensionProfile {
    fn new(
        id: &str,
        name: &str,
        version: &str,
        description: &str,
        permissions: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            enabled: true,
        }
    }

    /// `chrome.management.getAll()`-shaped record for this extension.
    pub fn management_entry(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "shortName": self.name,
            "version": self.version,
            "versionName": self.version,
            "description": self.description,
            "enabled": self.enabled,
            "type": "extension",
            "installType": "normal",
            "mayDisable": true,
            "offlineEnabled": false,
            "homepageUrl": format!("https://chrome.google.com/webstore/detail/{}", self.id),
            "updateUrl": "https://clients2.google.com/service/update2/crx",
            "permissions": self.permissions,
        })
    }
}

/// Catalog of common real-world extensions.
pub fn extension_catalog() -> Vec<ExtensionProfile> {
    vec![
        ExtensionProfile::new(
            "nmmhkkegccagdldgiimedpiccmgmieda",
            "Chrome Web Store Payments",
            "1.0.0.7",
            "Provides payment methods in the Chrome Web Store",
            &["webRequest", "webRequestBlocking", "storage"],
        ),
        ExtensionProfile::new(
            "pjkljhegncpnkpknbcohdijeoejaedia",
            "Gmail",
            "8.1",
            "Gmail Chrome App",
            &["identity", "identity.email", "storage"],
        ),
        ExtensionProfile::new(
            "apdfllckaahabafndbhieahigkjlhalf",
            "Google Drive",
            "14.1",
            "Google Drive Chrome App",
            &["identity", "storage"],
        ),
        ExtensionProfile::new(
            "ghbmnnjooekpmoecnnnilnnbdlolhkhi",
            "Google Docs Offline",
            "1.7",
            "Edit, create, and view your documents, spreadsheets, and presentations offline",
            &["unlimitedStorage", "storage"],
        ),
        ExtensionProfile::new(
            "aapbdbdomjkkjkaonfhkkikfgjllcleb",
            "Google Translate",
            "2.0.7",
            "View translations easily as you browse the web",
            &["activeTab", "contextMenus", "storage"],
        ),
        ExtensionProfile::new(
            "coobgpohoikkiipiblmjeljniedjpjpf",
            "Grammarly for Chrome",
            "14.932.1",
            "Grammarly helps you write mistake-free English anywhere on the web",
            &[
                "activeTab",
                "contextMenus",
                "storage",
                "tabs",
                "webNavigation",
                "webRequest",
                "webRequestBlocking",
            ],
        ),
        ExtensionProfile::new(
            "cjpalhdlnbpafiamejdnhcphjbkeiagm",
            "uBlock Origin",
            "1.58.0",
            "Finally, an efficient blocker. Easy on CPU and memory.",
            &[
                "activeTab",
                "storage",
                "tabs",
                "unlimitedStorage",
                "webNavigation",
                "webRequest",
                "webRequestBlocking",
            ],
        ),
        ExtensionProfile::new(
            "gighmmpiobklfepjocnamgkkbiglidom",
            "AdBlock",
            "4.46.0",
            "Block ads and pop-ups on YouTube, Facebook, Twitch, and your favorite websites",
            &[
                "activeTab",
                "storage",
                "tabs",
                "unlimitedStorage",
                "webNavigation",
                "webRequest",
                "webRequestBlocking",
            ],
        ),
        ExtensionProfile::new(
            "dbepggeogbaibhgnhhndojpepiihcmeb",
            "Video Downloader professional",
            "5.2.3",
            "Download videos from any website in any format and quality",
            &[
                "activeTab",
                "downloads",
                "storage",
                "tabs",
                "webNavigation",
                "webRequest",
                "webRequestBlocking",
            ],
        ),
        ExtensionProfile::new(
            "bfbmjmiodbnnpllbbbfblcplfjjepjdn",
            "YouTube Video Downloader",
            "4.1.1",
            "Download any YouTube video with this simple extension",
            &["activeTab", "downloads", "storage", "tabs"],
        ),
    ]
}

// Extensions every sampled set carries; a Chrome profile without the Web
// Store payment component does not occur in the wild.
const CORE_EXTENSION_IDS: &[&str] = &[
    "nmmhkkegccagdldgiimedpiccmgmieda",
    "ghbmnnjooekpmoecnnnilnnbdlolhkhi",
];

/// Sample `count` extensions: the core pair plus random catalog entries,
/// each enabled with probability 0.9.
pub fn sample_extensions(rng: &mut SmallRng, count: usize) -> Vec<ExtensionProfile> {
    let catalog = extension_catalog();

    let mut selected: Vec<ExtensionProfile> = catalog
        .iter()
        .filter(|e| CORE_EXTENSION_IDS.contains(&e.id.as_str()))
        .cloned()
        .collect();

    let remaining: Vec<&ExtensionProfile> = catalog
        .iter()
        .filter(|e| !CORE_EXTENSION_IDS.contains(&e.id.as_str()))
        .collect();
    let additional = count.saturating_sub(selected.len()).min(remaining.len());
    selected.extend(
        remaining
            .choose_multiple(rng, additional)
            .map(|e| (*e).clone()),
    );

    for ext in selected.iter_mut() {
        ext.enabled = rng.gen_bool(0.9);
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn core_extensions_always_present() {
        let mut rng = SmallRng::seed_from_u64(1);
        let exts = sample_extensions(&mut rng, 5);
        for id in CORE_EXTENSION_IDS {
            assert!(exts.iter().any(|e| e.id == *id));
        }
        assert_eq!(exts.len(), 5);
    }

    #[test]
    fn oversized_request_clamps_to_catalog() {
        let mut rng = SmallRng::seed_from_u64(1);
        let exts = sample_extensions(&mut rng, 100);
        assert_eq!(exts.len(), extension_catalog().len());
    }

    #[test]
    fn management_entry_shape() {
        let ext = &extension_catalog()[0];
        let entry = ext.management_entry();
        assert_eq!(entry["id"], ext.id);
        assert_eq!(entry["type"], "extension");
        assert!(entry["homepageUrl"]
            .as_str()
            .unwrap()
            .ends_with(&ext.id));
    }

    #[test]
    fn catalog_ids_are_32_char_webstore_ids() {
        for ext in extension_catalog() {
            assert_eq!(ext.id.len(), 32);
            assert!(ext.id.chars().all(|c| c.is_ascii_lowercase()));
        }
    }
}
