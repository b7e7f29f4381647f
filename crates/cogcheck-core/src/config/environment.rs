//! Built-in deployment table and environment resolution.

use serde::Serialize;
use std::fmt::{Display, Formatter};

pub const ENVIRONMENT_VAR: &str = "COGCHECK_ENVIRONMENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Uat,
    Staging,
    Local,
}

struct EnvironmentEntry {
    environment: Environment,
    name: &'static str,
    aliases: &'static [&'static str],
    service_url: &'static str,
    collection_id: &'static str,
    granule_ids: &'static [&'static str],
}

const ENVIRONMENT_TABLE: [EnvironmentEntry; 4] = [
    EnvironmentEntry {
        environment: Environment::Production,
        name: "production",
        aliases: &["prod", "ops"],
        service_url: "https://harmony.earthdata.nasa.gov",
        collection_id: "C2208422957-POCLOUD",
        granule_ids: &["G2705075478-POCLOUD"],
    },
    EnvironmentEntry {
        environment: Environment::Uat,
        name: "uat",
        aliases: &[],
        service_url: "https://harmony.uat.earthdata.nasa.gov",
        collection_id: "C1234410736-POCLOUD",
        granule_ids: &["G1234601650-POCLOUD"],
    },
    EnvironmentEntry {
        environment: Environment::Staging,
        name: "staging",
        aliases: &["sit"],
        service_url: "https://harmony.sit.earthdata.nasa.gov",
        collection_id: "C1234410736-POCLOUD",
        granule_ids: &["G1234601650-POCLOUD"],
    },
    EnvironmentEntry {
        environment: Environment::Local,
        name: "local",
        aliases: &["localhost"],
        service_url: "http://localhost:3000",
        collection_id: "C1234410736-POCLOUD",
        granule_ids: &["G1234601650-POCLOUD"],
    },
];

impl Environment {
    pub const ALL: [Self; 4] = [Self::Production, Self::Uat, Self::Staging, Self::Local];

    fn entry(self) -> &'static EnvironmentEntry {
        match self {
            Self::Production => &ENVIRONMENT_TABLE[0],
            Self::Uat => &ENVIRONMENT_TABLE[1],
            Self::Staging => &ENVIRONMENT_TABLE[2],
            Self::Local => &ENVIRONMENT_TABLE[3],
        }
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }

    pub fn aliases(self) -> &'static [&'static str] {
        self.entry().aliases
    }

    pub fn service_url(self) -> &'static str {
        self.entry().service_url
    }

    /// Accepts the canonical name, an alias or the service root URL,
    /// ignoring case and a trailing slash.
    pub fn from_selector(selector: &str) -> Option<Self> {
        let selector = selector.trim().trim_end_matches('/').to_ascii_lowercase();
        if selector.is_empty() {
            return None;
        }
        ENVIRONMENT_TABLE
            .iter()
            .find(|entry| {
                entry.name == selector
                    || entry.aliases.contains(&selector.as_str())
                    || entry.service_url == selector
            })
            .map(|entry| entry.environment)
    }

    pub fn run_context(self) -> RunContext {
        let entry = self.entry();
        RunContext {
            environment: self,
            service_url: entry.service_url.to_string(),
            collection_id: entry.collection_id.to_string(),
            granule_ids: entry.granule_ids.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).name())
    }
}

/// Everything a scenario needs to talk to one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub environment: Environment,
    pub service_url: String,
    pub collection_id: String,
    pub granule_ids: Vec<String>,
}

impl RunContext {
    pub fn provisions_granule(&self, granule_id: &str) -> bool {
        self.granule_ids.iter().any(|granule| granule == granule_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentResolution {
    Supported(RunContext),
    Unsupported { selector: String },
}

impl EnvironmentResolution {
    pub fn skip_notice(&self) -> Option<String> {
        match self {
            Self::Supported(_) => None,
            Self::Unsupported { selector } => Some(format!(
                "Environment '{}' is not configured for this suite; skipping every scenario (known: {})",
                selector,
                Environment::ALL
                    .iter()
                    .map(|environment| environment.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

pub fn resolve_environment(selector: &str) -> EnvironmentResolution {
    match Environment::from_selector(selector) {
        Some(environment) => EnvironmentResolution::Supported(environment.run_context()),
        None => EnvironmentResolution::Unsupported {
            selector: selector.to_string(),
        },
    }
}
