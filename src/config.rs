//! Configuration layer (ambient stack; spec.md §1's process-bootstrap
//! collaborator). Adapted from the teacher's `rls/src/config.rs`: the same
//! duplicate/unknown-key-reporting `serde_ignored` + `heck` discipline, keyed
//! to this core's own settings rather than RLS's.

use std::collections::HashMap;

use heck::SnakeCase;
use serde::{de::IntoDeserializer, Deserialize};
use serde_json::Value;

/// Back-end address for one leg of the Master Router (spec.md §4.4).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendAddr {
    Stdio,
    Tcp { host: String, port: u16 },
}

/// Process-wide configuration. Per-connection lifecycle/handler state lives
/// in `ConnectionState`/`HandlerTable`; this covers only what must be known
/// before a connection exists.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Whether `initialize` should default `streamingCapable` to true when
    /// the client's `capabilities.streaming` is absent.
    pub default_streaming: bool,
    /// `--strict` (spec.md §6): remote-filesystem mode via `workspace/xfiles`
    /// / `textDocument/xcontent` reverse requests instead of local disk.
    pub strict: bool,
    /// The Master Router's `light` back-end, if this process runs one.
    pub light_backend: Option<BackendAddr>,
    /// The Master Router's `heavy` back-end, if this process runs one.
    pub heavy_backend: Option<BackendAddr>,
}

impl Default for Config {
    fn default() -> Config {
        Config { default_streaming: false, strict: false, light_backend: None, heavy_backend: None }
    }
}

impl Config {
    /// Deserializes a `Config` from a JSON object, converting first-level
    /// keys to `snake_case` and reporting duplicate keys (two input keys that
    /// normalize to the same snake_case name) and unknown keys (normalized
    /// names that don't match any `Config` field), mirroring the teacher's
    /// `Config::try_deserialize`.
    pub fn try_deserialize(
        val: &Value,
        dups: &mut HashMap<String, Vec<String>>,
        unknowns: &mut Vec<String>,
    ) -> Result<Config, ()> {
        #[derive(Clone)]
        struct JsonValue(Value);

        impl<'de> IntoDeserializer<'de, serde_json::Error> for JsonValue {
            type Deserializer = Value;
            fn into_deserializer(self) -> Self::Deserializer {
                self.0
            }
        }

        let map = match val {
            Value::Object(map) => map,
            _ => return Err(()),
        };

        let seq = serde::de::value::MapDeserializer::new(map.iter().filter_map(|(k, v)| {
            let snake_case = k.to_snake_case();
            let entry = dups.entry(snake_case.clone()).or_default();
            entry.push(k.to_string());
            if entry.len() == 1 {
                Some((snake_case, JsonValue(v.to_owned())))
            } else {
                None
            }
        }));

        let result = match serde_ignored::deserialize(seq, |path| unknowns.push(path.to_string())) {
            Ok(conf) => Ok(conf),
            Err(_) => Err(()),
        };
        dups.retain(|_, v| v.len() > 1);
        result
    }
}
