//! Settings file.
//!
//! `dvtextmonitor.ini` lives next to the executable and contains exactly four
//! `KEY=VALUE` lines:
//!
//! ```plain
//! COM=COM1
//! SPEED=9600
//! MY=JA1XPM C
//! UR=CQCQCQ
//! ```
//!
//! A missing file is created with these defaults. An existing file is parsed
//! strictly.

use std::{
    collections::HashMap,
    path::{
        Path,
        PathBuf,
    },
};

use crate::callsign::{
    Callsign,
    Identity,
};

pub const SETTINGS_FILE_NAME: &str = "dvtextmonitor.ini";

pub const DEFAULT_SETTINGS: &str = "COM=COM1\nSPEED=9600\nMY=JA1XPM C\nUR=CQCQCQ\n";

const KEYS: [&str; 4] = ["COM", "SPEED", "MY", "UR"];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("INI FILE ERROR: could not read {path}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("INI FILE ERROR: line {line} is blank")]
    BlankLine { line: usize },

    #[error("INI FILE ERROR: line {line} has no '='")]
    MissingSeparator { line: usize },

    #[error("INI FILE ERROR: line {line} has an empty key or value")]
    EmptyEntry { line: usize },

    #[error("INI FILE ERROR: duplicate key {key}")]
    DuplicateKey { key: String },

    #[error("INI FILE ERROR: expected exactly the keys COM, SPEED, MY and UR")]
    UnexpectedKeys,

    #[error("INI FILE ERROR: invalid SPEED: {value}")]
    InvalidSpeed {
        value: String,
        #[source]
        error: std::num::ParseIntError,
    },

    #[error("INI FILE ERROR: {key} is not a valid callsign")]
    EmptyCallsign { key: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub port: String,
    pub baud_rate: u32,
    pub my: Callsign,
    pub ur: Callsign,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: "COM1".to_owned(),
            baud_rate: 9600,
            my: Callsign::normalize("JA1XPM C"),
            ur: Callsign::normalize("CQCQCQ"),
        }
    }
}

impl Settings {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let mut entries = HashMap::with_capacity(KEYS.len());

        for (index, line) in s.lines().enumerate() {
            let line_number = index + 1;

            if line.trim().is_empty() {
                return Err(Error::BlankLine { line: line_number });
            }

            let Some((key, value)) = line.split_once('=')
            else {
                return Err(Error::MissingSeparator { line: line_number });
            };

            let key = key.trim().to_uppercase();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return Err(Error::EmptyEntry { line: line_number });
            }

            if entries.contains_key(&key) {
                return Err(Error::DuplicateKey { key });
            }
            entries.insert(key, value);
        }

        if entries.len() != KEYS.len() || !KEYS.iter().all(|key| entries.contains_key(*key)) {
            return Err(Error::UnexpectedKeys);
        }

        let baud_rate = entries["SPEED"]
            .parse()
            .map_err(|error| {
                Error::InvalidSpeed {
                    value: entries["SPEED"].to_owned(),
                    error,
                }
            })?;

        let my = Callsign::normalize(entries["MY"]);
        if my.is_empty() {
            return Err(Error::EmptyCallsign { key: "MY" });
        }

        let ur = Callsign::normalize(entries["UR"]);
        if ur.is_empty() {
            return Err(Error::EmptyCallsign { key: "UR" });
        }

        Ok(Self {
            port: entries["COM"].to_owned(),
            baud_rate,
            my,
            ur,
        })
    }

    /// Loads the settings file, or creates it with the defaults if it doesn't
    /// exist.
    pub fn load_or_create(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            match std::fs::write(path, DEFAULT_SETTINGS) {
                Ok(()) => tracing::info!(path = %path.display(), "created settings file"),
                Err(error) => {
                    tracing::warn!(path = %path.display(), ?error, "could not create settings file")
                }
            }
            return Ok(Self::default());
        }

        let s = std::fs::read_to_string(path).map_err(|error| {
            Error::Read {
                path: path.to_owned(),
                error,
            }
        })?;

        Self::parse(&s)
    }

    /// `dvtextmonitor.ini` in the directory of the executable.
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_owned))
            .unwrap_or_default()
            .join(SETTINGS_FILE_NAME)
    }

    /// Applies values given on the command line. Callsigns that normalize to
    /// nothing are ignored.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(port) = &overrides.port {
            self.port = port.clone();
        }
        if let Some(baud_rate) = overrides.baud_rate {
            self.baud_rate = baud_rate;
        }
        for (target, value) in [(&mut self.my, &overrides.my), (&mut self.ur, &overrides.ur)] {
            if let Some(value) = value {
                let callsign = Callsign::normalize(value);
                if !callsign.is_empty() {
                    *target = callsign;
                }
            }
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.my.clone(), self.ur.clone())
    }
}

#[derive(Clone, Debug, Default, clap::Args)]
pub struct Overrides {
    /// Serial port, e.g. `COM3` or `/dev/ttyUSB0`.
    #[clap(long, env = "DVTM_PORT")]
    pub port: Option<String>,

    #[clap(long = "baud", env = "DVTM_BAUD")]
    pub baud_rate: Option<u32>,

    /// Our callsign, e.g. `JA1XPM C`.
    #[clap(long, env = "DVTM_MY")]
    pub my: Option<String>,

    /// Destination callsign.
    #[clap(long, env = "DVTM_UR")]
    pub ur: Option<String>,
}
