//! Invocation contract for external frontends.
//!
//! The TUI, server and transport layers live outside this workspace; this
//! module pins down what the core accepts from them: the mode set, the
//! server-url scheme restriction, and the channels list format.

use std::fmt;

pub const SUPPORTED_MODES: [&str; 3] = ["tui", "server", "tui-client"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Tui,
    Server,
    TuiClient,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tui => "tui",
            Self::Server => "server",
            Self::TuiClient => "tui-client",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvocationError {
    /// Unknown mode; carries the supported listing for the caller to print.
    UnknownMode { given: String, supported: Vec<String> },
    /// The retired telegram frontend; rejected with the current mode set.
    LegacyMode { given: String, supported: Vec<String> },
    InvalidServerUrl(String),
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMode { given, supported } => write!(
                f,
                "unknown mode '{}', supported modes: {}",
                given,
                supported.join(", ")
            ),
            Self::LegacyMode { given, supported } => write!(
                f,
                "mode '{}' is no longer supported, supported modes: {}",
                given,
                supported.join(", ")
            ),
            Self::InvalidServerUrl(url) => {
                write!(f, "invalid server url '{}': expected http or https", url)
            }
        }
    }
}

impl std::error::Error for InvocationError {}

fn supported_listing() -> Vec<String> {
    SUPPORTED_MODES.iter().map(|m| m.to_string()).collect()
}

pub fn parse_mode(s: &str) -> Result<Mode, InvocationError> {
    match s {
        "tui" => Ok(Mode::Tui),
        "server" => Ok(Mode::Server),
        "tui-client" => Ok(Mode::TuiClient),
        "telegram" => Err(InvocationError::LegacyMode {
            given: s.to_string(),
            supported: supported_listing(),
        }),
        other => Err(InvocationError::UnknownMode {
            given: other.to_string(),
            supported: supported_listing(),
        }),
    }
}

/// Accepts only http/https URLs with a non-empty host part.
pub fn validate_server_url(url: &str) -> Result<(), InvocationError> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(InvocationError::InvalidServerUrl(url.to_string())),
    }
}

/// Splits a `--channels` csv value, trimming entries and dropping empties.
pub fn parse_channels(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
