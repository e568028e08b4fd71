use crate::core::template::TemplateError;
use thiserror::Error;

/// Core error types for fleetwall
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A single entity failed its own checks (missing field, bad address, empty list)
    #[error("Invalid topology at {path}: {message}")]
    Structural { path: String, message: String },

    /// A dependency edge doesn't resolve, or a server depends on itself
    #[error("Invalid relation for server \"{server}\": {message}")]
    Referential {
        server: String,
        network: Option<String>,
        service: Option<String>,
        message: String,
    },

    /// A rule template failed to compile or render
    #[error("Rule error for {context}: {source}")]
    Template {
        context: RuleContext,
        #[source]
        source: TemplateError,
    },

    /// Requested server isn't part of the fleet
    #[error("Server not found: {0}")]
    ServerNotFound(String),
}

impl Error {
    pub(crate) fn structural(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Structural {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn referential(server: &str, message: impl Into<String>) -> Self {
        Error::Referential {
            server: server.to_string(),
            network: None,
            service: None,
            message: message.into(),
        }
    }

    /// Attaches network/service context to a [`Error::Referential`]; other variants pass through
    pub(crate) fn at(mut self, network: Option<&str>, service: Option<&str>) -> Self {
        if let Error::Referential {
            network: ref mut n,
            service: ref mut s,
            ..
        } = self
        {
            *n = network.map(str::to_string);
            *s = service.map(str::to_string);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Structural { .. } => ErrorKind::StructuralInvalid,
            Error::Referential { .. } => ErrorKind::ReferentialInvalid,
            Error::Template { source, .. } => match source {
                TemplateError::Compile { .. } => ErrorKind::TemplateCompile,
                TemplateError::Binding { .. } => ErrorKind::TemplateBinding,
            },
            Error::ServerNotFound(_) => ErrorKind::ServerNotFound,
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(e: tempfile::PersistError) -> Self {
        Error::Io(e.error)
    }
}

/// Error discriminant, for callers that branch on the failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum ErrorKind {
    #[strum(serialize = "io")]
    Io,
    #[strum(serialize = "serialization")]
    Serialization,
    #[strum(serialize = "structural-invalid")]
    StructuralInvalid,
    #[strum(serialize = "referential-invalid")]
    ReferentialInvalid,
    #[strum(serialize = "template-compile")]
    TemplateCompile,
    #[strum(serialize = "template-binding")]
    TemplateBinding,
    #[strum(serialize = "server-not-found")]
    ServerNotFound,
}

/// Where a failing rule lives in the render plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleContext {
    pub server: String,
    /// Section header the rule belongs to, e.g. "acquirable service"
    pub section: &'static str,
    pub network: Option<String>,
    pub service: Option<String>,
}

impl RuleContext {
    pub fn new(server: &str, section: &'static str) -> Self {
        Self {
            server: server.to_string(),
            section,
            network: None,
            service: None,
        }
    }

    pub fn network(mut self, network: &str) -> Self {
        self.network = Some(network.to_string());
        self
    }

    pub fn service(mut self, service: &str) -> Self {
        self.service = Some(service.to_string());
        self
    }
}

impl std::fmt::Display for RuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server \"{}\" {}", self.server, self.section)?;
        if let Some(ref network) = self.network {
            write!(f, " network \"{network}\"")?;
        }
        if let Some(ref service) = self.service {
            write!(f, " service \"{service}\"")?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
