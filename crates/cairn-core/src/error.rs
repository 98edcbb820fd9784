use std::fmt;

/// Machine-readable error codes for scripted callers and log parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    EntityNotFound,
    InvalidSnapshot,
    UnknownEnumValue,
    DuplicateCreate,
    StoreWriteFailed,
    DeliveryFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::EntityNotFound => "E2001",
            Self::InvalidSnapshot => "E2002",
            Self::UnknownEnumValue => "E2003",
            Self::DuplicateCreate => "E3001",
            Self::StoreWriteFailed => "E5001",
            Self::DeliveryFailed => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Activity store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::EntityNotFound => "Entity not found",
            Self::InvalidSnapshot => "Entity snapshot is not a JSON object",
            Self::UnknownEnumValue => "Invalid activity/entity type value",
            Self::DuplicateCreate => "Entity already has a created activity",
            Self::StoreWriteFailed => "Activity store write failed",
            Self::DeliveryFailed => "Notification delivery failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `cairn init` to create the activity store."),
            Self::ConfigParseError => Some("Fix syntax in the config TOML and retry."),
            Self::EntityNotFound | Self::DuplicateCreate => None,
            Self::InvalidSnapshot => Some("Pass entity snapshots as JSON objects."),
            Self::UnknownEnumValue => {
                Some("Use created/updated/deleted/uploaded and area/block/route/ascent/file/user.")
            }
            Self::StoreWriteFailed => Some("Check disk space and write permissions."),
            Self::DeliveryFailed => {
                Some("Activities stay un-notified; the next notify pass retries them.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
