//! Static provider policy: ids, capabilities, chains and credentials.
//!
//! `OpenMeteo` is the universal fallback: global coverage, no credential,
//! widest horizon. Every other provider and every chain degrades to it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Minimum trimmed length for a credential to count as configured.
const MIN_CREDENTIAL_LEN: usize = 5;

/// Open-Meteo forecast horizon (days).
pub const OPENMETEO_MAX_DAYS: i64 = 14;
/// MeteoBlue forecast horizon (days).
pub const METEOBLUE_MAX_DAYS: i64 = 7;
/// OpenWeather One Call horizon (days). Hourly covers ~48h, daily beyond.
pub const OPENWEATHER_MAX_DAYS: i64 = 2;
/// AROME-HD forecast horizon (hours).
pub const AROMEHD_MAX_HOURS: i64 = 48;

/// Coarse AROME-HD domain (inclusive edges).
pub const AROMEHD_COVERAGE: BoundingBox = BoundingBox {
    min_lat: 39.0,
    max_lat: 52.5,
    min_lon: -10.5,
    max_lon: 16.5,
};

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenMeteo,
    AromeHd,
    MeteoBlue,
    OpenWeather,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::OpenMeteo,
        ProviderId::AromeHd,
        ProviderId::MeteoBlue,
        ProviderId::OpenWeather,
    ];

    /// Stable lowercase id (cache keys, JSON, query params).
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenMeteo => "openmeteo",
            ProviderId::AromeHd => "aromehd",
            ProviderId::MeteoBlue => "meteoblue",
            ProviderId::OpenWeather => "openweather",
        }
    }

    /// Human-readable vendor name for notices.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::OpenMeteo => "Open-Meteo",
            ProviderId::AromeHd => "AROME-HD",
            ProviderId::MeteoBlue => "MeteoBlue",
            ProviderId::OpenWeather => "OpenWeather",
        }
    }

    pub fn capability(&self) -> ProviderCapability {
        match self {
            ProviderId::OpenMeteo => ProviderCapability {
                max_horizon_hours: OPENMETEO_MAX_DAYS * 24,
                coverage: None,
                requires_credential: false,
            },
            ProviderId::AromeHd => ProviderCapability {
                max_horizon_hours: AROMEHD_MAX_HOURS,
                coverage: Some(AROMEHD_COVERAGE),
                requires_credential: false,
            },
            ProviderId::MeteoBlue => ProviderCapability {
                max_horizon_hours: METEOBLUE_MAX_DAYS * 24,
                coverage: None,
                requires_credential: true,
            },
            ProviderId::OpenWeather => ProviderCapability {
                max_horizon_hours: OPENWEATHER_MAX_DAYS * 24,
                coverage: None,
                requires_credential: true,
            },
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| format!("Unknown provider '{}'", s))
    }
}

/// Geographic rectangle in decimal degrees, edges inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// Static per-provider limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct ProviderCapability {
    pub max_horizon_hours: i64,
    /// `None` means global coverage.
    pub coverage: Option<BoundingBox>,
    pub requires_credential: bool,
}

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChainId {
    /// OpenWeather 0–2h, AROME-HD 2–36h, Open-Meteo beyond.
    Ow2AromeOpenmeteo,
    /// AROME-HD 0–36h, Open-Meteo beyond.
    AromeOpenmeteo,
}

/// One `[from_hours, to_hours)` slice of a chain, measured from "now".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct ChainBucket {
    pub provider: ProviderId,
    pub from_hours: f64,
    /// `None` means open-ended.
    pub to_hours: Option<f64>,
}

impl ChainBucket {
    fn contains(&self, elapsed_hours: f64) -> bool {
        elapsed_hours >= self.from_hours && self.to_hours.map_or(true, |to| elapsed_hours < to)
    }
}

static OW2_AROME_OPENMETEO: [ChainBucket; 3] = [
    ChainBucket {
        provider: ProviderId::OpenWeather,
        from_hours: 0.0,
        to_hours: Some(2.0),
    },
    ChainBucket {
        provider: ProviderId::AromeHd,
        from_hours: 2.0,
        to_hours: Some(36.0),
    },
    ChainBucket {
        provider: ProviderId::OpenMeteo,
        from_hours: 36.0,
        to_hours: None,
    },
];

static AROME_OPENMETEO: [ChainBucket; 2] = [
    ChainBucket {
        provider: ProviderId::AromeHd,
        from_hours: 0.0,
        to_hours: Some(36.0),
    },
    ChainBucket {
        provider: ProviderId::OpenMeteo,
        from_hours: 36.0,
        to_hours: None,
    },
];

impl ChainId {
    pub const ALL: [ChainId; 2] = [ChainId::Ow2AromeOpenmeteo, ChainId::AromeOpenmeteo];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Ow2AromeOpenmeteo => "ow2_arome_openmeteo",
            ChainId::AromeOpenmeteo => "arome_openmeteo",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChainId::Ow2AromeOpenmeteo => "OpenWeather 0-2h, AROME-HD 2-36h, Open-Meteo 36h+",
            ChainId::AromeOpenmeteo => "AROME-HD 0-36h, Open-Meteo 36h+",
        }
    }

    pub fn buckets(&self) -> &'static [ChainBucket] {
        match self {
            ChainId::Ow2AromeOpenmeteo => &OW2_AROME_OPENMETEO,
            ChainId::AromeOpenmeteo => &AROME_OPENMETEO,
        }
    }

    /// Provider for a sample `elapsed_hours` from now. Past samples (negative
    /// elapsed) use the first bucket; gaps fall through to Open-Meteo.
    pub fn provider_at(&self, elapsed_hours: f64) -> ProviderId {
        let buckets = self.buckets();
        if elapsed_hours < 0.0 {
            return buckets[0].provider;
        }
        buckets
            .iter()
            .find(|b| b.contains(elapsed_hours))
            .map(|b| b.provider)
            .unwrap_or(ProviderId::OpenMeteo)
    }
}

impl FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ChainId::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| format!("Unknown chain '{}'", s))
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// What the caller asked for: one provider, or a chain.
///
/// Serialized as its plain string id (`"meteoblue"`, `"arome_openmeteo"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderSelector {
    Provider(ProviderId),
    Chain(ChainId),
}

impl ProviderSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderSelector::Provider(p) => p.as_str(),
            ProviderSelector::Chain(c) => c.as_str(),
        }
    }
}

impl FromStr for ProviderSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(p) = s.parse::<ProviderId>() {
            return Ok(ProviderSelector::Provider(p));
        }
        s.parse::<ChainId>()
            .map(ProviderSelector::Chain)
            .map_err(|_| format!("Unknown provider or chain '{}'", s))
    }
}

impl TryFrom<String> for ProviderSelector {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProviderSelector> for String {
    fn from(s: ProviderSelector) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for ProviderSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// API keys for credentialed providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(default)]
pub struct Credentials {
    pub meteoblue: Option<String>,
    pub openweather: Option<String>,
}

impl Credentials {
    /// The raw key for `provider`, if any (unvalidated).
    pub fn get(&self, provider: ProviderId) -> Option<&str> {
        match provider {
            ProviderId::MeteoBlue => self.meteoblue.as_deref(),
            ProviderId::OpenWeather => self.openweather.as_deref(),
            ProviderId::OpenMeteo | ProviderId::AromeHd => None,
        }
    }

    /// A usable key for `provider`: present and long enough after trimming.
    pub fn usable(&self, provider: ProviderId) -> Option<&str> {
        self.get(provider)
            .map(str::trim)
            .filter(|k| k.len() >= MIN_CREDENTIAL_LEN)
    }

    pub fn has(&self, provider: ProviderId) -> bool {
        self.usable(provider).is_some()
    }

    /// Credentials holding only `key`, filed under `provider`.
    pub fn single(provider: ProviderId, key: Option<&str>) -> Credentials {
        let key = key.map(str::to_string);
        match provider {
            ProviderId::MeteoBlue => Credentials {
                meteoblue: key,
                ..Default::default()
            },
            ProviderId::OpenWeather => Credentials {
                openweather: key,
                ..Default::default()
            },
            ProviderId::OpenMeteo | ProviderId::AromeHd => Credentials::default(),
        }
    }

    /// Per-request keys win; missing ones fall back to `defaults`.
    pub fn or(self, defaults: &Credentials) -> Credentials {
        Credentials {
            meteoblue: self.meteoblue.or_else(|| defaults.meteoblue.clone()),
            openweather: self.openweather.or_else(|| defaults.openweather.clone()),
        }
    }
}
