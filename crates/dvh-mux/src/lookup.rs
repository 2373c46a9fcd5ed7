//! Numeric station ID to callsign tables (DMR and NXDN)
//!
//! Table files hold one station per line: `id callsign [name...]`, fields
//! separated by whitespace, commas or semicolons. Blank lines and lines
//! starting with `#` are ignored.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::LookupError;

/// Read-only ID table
#[derive(Debug, Default, Clone)]
pub struct IdLookup {
    entries: HashMap<u32, String>,
}

impl IdLookup {
    /// Load a table file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| LookupError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let lookup = Self::parse(&text);
        info!("Loaded {} IDs from {}", lookup.len(), path.display());
        Ok(lookup)
    }

    /// Build a table from (id, callsign) pairs
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(id, call)| (id, call.into()))
                .collect(),
        }
    }

    fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line
                .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
                .filter(|f| !f.is_empty());

            let id = fields.next().and_then(|f| f.parse::<u32>().ok());
            let callsign = fields.next();
            match (id, callsign) {
                (Some(id), Some(callsign)) => {
                    entries.insert(id, callsign.to_ascii_uppercase());
                }
                _ => debug!("Skipping malformed ID line {}: {:?}", number + 1, line),
            }
        }

        Self { entries }
    }

    /// Callsign for an ID
    pub fn find(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
