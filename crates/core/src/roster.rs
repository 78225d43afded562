use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-streamer configuration loaded from the static roster file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Twitch login. Matched case-sensitively against event payloads.
    pub streamer_name: String,
    pub going_live_message: String,
}

/// Ordered, immutable set of streamers the relay is responsible for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamerRoster {
    streamers: Vec<StreamerConfig>,
}

impl StreamerRoster {
    pub fn new(streamers: Vec<StreamerConfig>) -> Self {
        Self { streamers }
    }

    /// Parses the roster from a JSON array of streamer entries.
    pub fn from_json_str(raw: &str) -> Result<Self, RosterError> {
        let streamers: Vec<StreamerConfig> = serde_json::from_str(raw)?;
        if let Some(entry) = streamers
            .iter()
            .find(|entry| entry.streamer_name.trim().is_empty())
        {
            return Err(RosterError::EmptyName(entry.going_live_message.clone()));
        }
        Ok(Self { streamers })
    }

    /// Reads and parses the roster file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| RosterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn streamers(&self) -> &[StreamerConfig] {
        &self.streamers
    }

    pub fn len(&self) -> usize {
        self.streamers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streamers.is_empty()
    }

    /// Finds the entry whose `streamer_name` equals `login` exactly.
    pub fn find(&self, login: &str) -> Option<&StreamerConfig> {
        self.streamers
            .iter()
            .find(|entry| entry.streamer_name == login)
    }

    pub fn going_live_message(&self, login: &str) -> Option<&str> {
        self.find(login)
            .map(|entry| entry.going_live_message.as_str())
    }
}

/// Errors raised while loading the streamer roster.
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to read roster file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("roster file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("roster entry with message {0:?} has an empty streamer_name")]
    EmptyName(String),
}
