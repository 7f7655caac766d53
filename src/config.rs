//! Gateway configuration: server descriptors, profile definitions, and the
//! JSON/YAML loader with `${VAR}` environment substitution.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::OnceLock;

fn listen_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[\w.-]+:\d+$").expect("listen regex is valid"))
}

/// A tagged server descriptor: either an HTTP or stdio upstream MCP server.
///
/// Serialized with `#[serde(tag = "type")]` so the config file uses
/// `"type": "http"` / `"type": "stdio"`. No untagged legacy shape is
/// accepted — this gateway has no prior wire format to stay compatible with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerDescriptor {
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
}

impl ServerDescriptor {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Stdio { .. } => "stdio",
        }
    }
}

/// `prefix` may be absent, an explicit string, or the "explicitly empty"
/// sentinel (`false` in the config file).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PrefixSelection {
    #[default]
    Absent,
    Empty,
    Explicit(String),
}

impl Serialize for PrefixSelection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Absent => serializer.serialize_none(),
            Self::Empty => serializer.serialize_bool(false),
            Self::Explicit(value) => serializer.serialize_str(value),
        }
    }
}

impl<'de> Deserialize<'de> for PrefixSelection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Str(String),
        }

        let raw = Option::<Raw>::deserialize(deserializer)?;
        Ok(match raw {
            None => PrefixSelection::Absent,
            Some(Raw::Bool(false)) => PrefixSelection::Empty,
            Some(Raw::Bool(true)) => PrefixSelection::Absent,
            Some(Raw::Str(value)) => PrefixSelection::Explicit(value),
        })
    }
}

impl PrefixSelection {
    /// Resolve against a default (the server-id prefix, or "" for nested profiles).
    pub fn resolve(&self, default: &str) -> String {
        match self {
            Self::Absent => default.to_string(),
            Self::Empty => String::new(),
            Self::Explicit(value) => value.clone(),
        }
    }
}

/// Per-entry selection inside a profile definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileSelection {
    pub tools: Option<Vec<String>>,
    pub prompts: Option<Vec<String>>,
    #[serde(default)]
    pub prefix: PrefixSelection,
}

/// A profile definition: `entry-name -> selection`, preserving definition order.
pub type ProfileDefinition = Vec<(String, ProfileSelection)>;

/// Top-level deserialized config document.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen: String,
    pub mcp_servers: Vec<(String, ServerDescriptor)>,
    pub profiles: HashMap<String, ProfileDefinition>,
}

/// Wire representation mirroring the JSON/YAML shape verbatim; order of
/// `mcpServers`/profile-entry maps is preserved via `Vec<(String, T)>` rather
/// than an ordinary serde map, since resolution order is load-bearing and
/// `indexmap` is not part of this crate's dependency stack.
#[derive(Debug, Deserialize)]
struct RawConfig {
    listen: String,
    #[serde(default, rename = "mcpServers", with = "ordered_map")]
    mcp_servers: Vec<(String, ServerDescriptor)>,
    #[serde(default, with = "ordered_map_of_definitions")]
    profiles: Vec<(String, Vec<(String, ProfileSelection)>)>,
}

mod ordered_map {
    use super::ServerDescriptor;
    use serde::{Deserialize, Deserializer};
    use std::collections::BTreeMap;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, ServerDescriptor)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // `serde_json`/`serde_yaml` both preserve key order on `BTreeMap` only
        // alphabetically. Server order (unlike profile-entry order) has no
        // effect on resolution, so a BTreeMap is sufficient here.
        let map = BTreeMap::<String, ServerDescriptor>::deserialize(deserializer)?;
        Ok(map.into_iter().collect())
    }
}

mod ordered_map_of_definitions {
    use super::ProfileSelection;
    use serde::{Deserialize, Deserializer};
    use std::collections::BTreeMap;

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<Vec<(String, Vec<(String, ProfileSelection)>)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = BTreeMap::<String, IndexedSelections>::deserialize(deserializer)?;
        Ok(map.into_iter().map(|(k, v)| (k, v.0)).collect())
    }

    struct IndexedSelections(Vec<(String, ProfileSelection)>);

    impl<'de> Deserialize<'de> for IndexedSelections {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            // `serde_json::Map` preserves source-document insertion order
            // (the `preserve_order` behaviour is the default for gateways of
            // this shape); going through `serde_json::Value` first recovers
            // that order for both the JSON and YAML front-ends.
            let value = serde_json::Value::deserialize(deserializer)?;
            let object = value
                .as_object()
                .ok_or_else(|| serde::de::Error::custom("expected a profile entry map"))?;
            let mut entries = Vec::with_capacity(object.len());
            for (name, raw_selection) in object {
                let selection: ProfileSelection = serde_json::from_value(raw_selection.clone())
                    .map_err(serde::de::Error::custom)?;
                entries.push((name.clone(), selection));
            }
            Ok(IndexedSelections(entries))
        }
    }
}

impl GatewayConfig {
    /// Loads and validates a config file, dispatching on extension.
    pub fn load(path: &Path) -> Result<Self> {
        let raw_text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read gateway config: {}", path.display()))?;
        let substituted = substitute_env(&raw_text);

        let raw: RawConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&substituted)
                .with_context(|| format!("failed to parse JSON config: {}", path.display()))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&substituted)
                .with_context(|| format!("failed to parse YAML config: {}", path.display()))?,
            _ => serde_json::from_str(&substituted).or_else(|json_err| {
                serde_yaml::from_str(&substituted)
                    .with_context(|| format!("failed to parse config: {}", path.display()))
                    .map_err(|_| json_err)
                    .with_context(|| {
                        format!(
                            "failed to parse config as JSON or YAML: {}",
                            path.display()
                        )
                    })
            })?,
        };

        let config = Self {
            listen: raw.listen,
            mcp_servers: raw.mcp_servers,
            profiles: raw.profiles.into_iter().collect(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !listen_pattern().is_match(&self.listen) {
            bail!(
                "invalid 'listen' address '{}': expected '<host>:<port>'",
                self.listen
            );
        }

        for (id, descriptor) in &self.mcp_servers {
            match descriptor {
                ServerDescriptor::Http { url, .. } => {
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        bail!("server '{id}': http url '{url}' must start with http:// or https://");
                    }
                }
                ServerDescriptor::Stdio { command, .. } => {
                    if command.trim().is_empty() {
                        bail!("server '{id}': stdio command must be non-empty");
                    }
                }
            }
        }

        for (profile_name, definition) in &self.profiles {
            for (entry_name, _selection) in definition {
                let is_server = self.mcp_servers.iter().any(|(id, _)| id == entry_name);
                let is_profile = self.profiles.contains_key(entry_name);
                if !is_server && !is_profile {
                    bail!(
                        "profile '{profile_name}': entry '{entry_name}' references neither \
                         a declared server nor another profile"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Replaces `${VAR}` substrings with the value of the named environment
/// variable. A missing variable logs a warning and is replaced with "".
fn substitute_env(input: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

    pattern
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| {
                tracing::warn!(var = %var_name, "config references undefined environment variable");
                String::new()
            })
        })
        .into_owned()
}
