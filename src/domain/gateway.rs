use serde::Serialize;

/// Which gateway deployment a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    #[must_use]
    pub const fn from_sandbox_flag(sandbox: bool) -> Self {
        if sandbox { Self::Sandbox } else { Self::Production }
    }

    /// Resolves the gateway host and port for a connection purpose.
    #[must_use]
    pub const fn endpoint(self, purpose: Purpose) -> Endpoint {
        let host = match (self, purpose) {
            (Self::Sandbox, Purpose::Push) => "gateway.sandbox.push.apple.com",
            (Self::Sandbox, Purpose::Feedback) => "feedback.sandbox.push.apple.com",
            (Self::Production, Purpose::Push) => "gateway.push.apple.com",
            (Self::Production, Purpose::Feedback) => "feedback.push.apple.com",
        };
        let port = match purpose {
            Purpose::Push => 2195,
            Purpose::Feedback => 2196,
        };
        Endpoint { host, port }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sandbox => write!(f, "sandbox"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            _ => Err(format!("Invalid environment: {s}")),
        }
    }
}

/// A connection either sends notifications or reads invalidation reports, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Push,
    Feedback,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Feedback => write!(f, "feedback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub host: &'static str,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
