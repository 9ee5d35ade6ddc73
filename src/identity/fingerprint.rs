//! Browser fingerprint generation
//!
//! Produces randomized but internally consistent browser identities: a mobile
//! fingerprint always carries a mobile user agent, a phone-sized viewport, a
//! high device scale factor and touch support.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

const MOBILE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 13; SM-S918B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Mobile Safari/537.36",
];

const DESKTOP_VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1366, 768),
    (1536, 864),
    (1440, 900),
    (1280, 720),
    (2560, 1440),
];

const MOBILE_VIEWPORTS: &[(u32, u32)] = &[(390, 844), (393, 852), (412, 915), (360, 800)];

const LOCALES: &[&str] = &["en-US", "en-GB", "zh-CN", "zh-TW"];

const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Los_Angeles",
    "Europe/London",
    "Asia/Shanghai",
    "Asia/Hong_Kong",
    "Asia/Tokyo",
];

/// Probability that a generated identity is a mobile device
const MOBILE_RATIO: f64 = 0.2;

/// Random offset applied to desktop viewport dimensions
const VIEWPORT_JITTER: i32 = 50;

/// Browser viewport in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Describes the browser an identity presents to the target
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserFingerprint {
    pub user_agent: String,
    pub viewport: Viewport,
    pub device_scale_factor: f64,
    pub is_mobile: bool,
    pub has_touch: bool,
    pub locale: String,
    pub timezone: String,
}

impl BrowserFingerprint {
    /// Short stable identifier derived from every field of the descriptor
    ///
    /// The first 16 hex characters of a SHA-256 over the fields.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.user_agent.as_bytes());
        hasher.update([0]);
        hasher.update(self.viewport.width.to_le_bytes());
        hasher.update(self.viewport.height.to_le_bytes());
        hasher.update(self.device_scale_factor.to_le_bytes());
        hasher.update([self.is_mobile as u8, self.has_touch as u8]);
        hasher.update(self.locale.as_bytes());
        hasher.update([0]);
        hasher.update(self.timezone.as_bytes());

        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }

    /// Returns true for Chromium-based user agents, the only ones sending client hints
    pub fn is_chromium(&self) -> bool {
        self.user_agent.contains("Chrome/")
    }

    /// Derives request headers consistent with this fingerprint
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        let mut insert = |name: &str, value: String| {
            headers.insert(name.to_string(), value);
        };

        insert(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                .to_string(),
        );
        insert("Accept-Language", accept_language(&self.locale));
        insert("Accept-Encoding", "gzip, deflate, br".to_string());
        insert("Connection", "keep-alive".to_string());
        insert("Upgrade-Insecure-Requests", "1".to_string());
        insert("Sec-Fetch-Dest", "document".to_string());
        insert("Sec-Fetch-Mode", "navigate".to_string());
        insert("Sec-Fetch-Site", "none".to_string());
        insert("Sec-Fetch-User", "?1".to_string());
        insert("Cache-Control", "max-age=0".to_string());
        if self.is_chromium() {
            insert(
                "Sec-CH-UA-Mobile",
                if self.is_mobile { "?1" } else { "?0" }.to_string(),
            );
        }

        headers
    }
}

fn accept_language(locale: &str) -> String {
    match locale.split('-').next() {
        Some("en") | None => format!("{},en;q=0.9", locale),
        Some(language) => format!("{},{};q=0.9,en;q=0.8", locale, language),
    }
}

/// Source of fresh browser fingerprints
#[derive(Debug)]
pub struct FingerprintGenerator {
    rng: StdRng,
}

impl FingerprintGenerator {
    /// Creates a generator seeded from the operating system
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a deterministic generator
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generates a new, internally consistent fingerprint
    pub fn generate(&mut self) -> BrowserFingerprint {
        let is_mobile = self.rng.gen_bool(MOBILE_RATIO);

        let (user_agent, viewport, device_scale_factor) = if is_mobile {
            let (width, height) = pick(&mut self.rng, MOBILE_VIEWPORTS);
            let scale = if self.rng.gen_bool(0.5) { 2.0 } else { 3.0 };
            (pick(&mut self.rng, MOBILE_USER_AGENTS), Viewport { width, height }, scale)
        } else {
            let (width, height) = pick(&mut self.rng, DESKTOP_VIEWPORTS);
            let viewport = Viewport {
                width: jitter(&mut self.rng, width),
                height: jitter(&mut self.rng, height),
            };
            (pick(&mut self.rng, DESKTOP_USER_AGENTS), viewport, 1.0)
        };

        BrowserFingerprint {
            user_agent: user_agent.to_string(),
            viewport,
            device_scale_factor,
            is_mobile,
            has_touch: is_mobile,
            locale: pick(&mut self.rng, LOCALES).to_string(),
            timezone: pick(&mut self.rng, TIMEZONES).to_string(),
        }
    }
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn pick<T: Copy>(rng: &mut StdRng, choices: &[T]) -> T {
    *choices
        .choose(rng)
        .expect("fingerprint tables are non-empty")
}

fn jitter(rng: &mut StdRng, base: u32) -> u32 {
    let offset = rng.gen_range(-VIEWPORT_JITTER..=VIEWPORT_JITTER);
    base.saturating_add_signed(offset).max(1)
}
