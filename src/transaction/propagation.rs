//! Transaction propagation policies.
//!
//! A propagation policy is attached to a unit of work and tells the engine
//! how the call relates to a transaction that may already be active in the
//! current execution context: start one, join it, suspend it, or refuse to
//! run at all.

use std::fmt;

/// Propagation policy for a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Join the active transaction, or start a new one if none is active.
    ///
    /// This is the default and by far the most common policy: the unit of
    /// work always runs inside a transaction, and whoever started it owns
    /// its completion.
    #[default]
    Required,

    /// Always start a new, independent transaction.
    ///
    /// If a transaction is already active it is suspended for the duration
    /// of the call and restored afterwards, untouched. The inner transaction
    /// commits or rolls back entirely on its own.
    RequiresNew,

    /// Require an already-active transaction; never start one.
    ///
    /// Fails with `TransactionRequired` if no transaction is active.
    Mandatory,

    /// Run without a transaction.
    ///
    /// An active transaction is suspended for the duration of the call;
    /// connections handed out inside the call carry no transaction
    /// semantics.
    NotSupported,

    /// Refuse to run inside a transaction.
    ///
    /// Fails with `TransactionNotAllowed` if one is active; runs inline
    /// (without a transaction) otherwise.
    Never,
}

impl Propagation {
    /// Get a human-readable description of this policy.
    pub fn description(&self) -> &'static str {
        match self {
            Propagation::Required => "join the active transaction or start a new one",
            Propagation::RequiresNew => "suspend any active transaction and start a new one",
            Propagation::Mandatory => "require an already-active transaction",
            Propagation::NotSupported => "suspend any active transaction and run without one",
            Propagation::Never => "fail if a transaction is active",
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::Required => write!(f, "REQUIRED"),
            Propagation::RequiresNew => write!(f, "REQUIRES_NEW"),
            Propagation::Mandatory => write!(f, "MANDATORY"),
            Propagation::NotSupported => write!(f, "NOT_SUPPORTED"),
            Propagation::Never => write!(f, "NEVER"),
        }
    }
}

impl std::str::FromStr for Propagation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace(' ', "_").as_str() {
            "REQUIRED" => Ok(Propagation::Required),
            "REQUIRES_NEW" | "REQUIRESNEW" => Ok(Propagation::RequiresNew),
            "MANDATORY" => Ok(Propagation::Mandatory),
            "NOT_SUPPORTED" | "NOTSUPPORTED" => Ok(Propagation::NotSupported),
            "NEVER" => Ok(Propagation::Never),
            _ => Err(format!("unknown propagation policy: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_propagation() {
        assert_eq!(Propagation::default(), Propagation::Required);
    }

    #[test]
    fn test_display_roundtrip() {
        for policy in [
            Propagation::Required,
            Propagation::RequiresNew,
            Propagation::Mandatory,
            Propagation::NotSupported,
            Propagation::Never,
        ] {
            assert_eq!(policy.to_string().parse::<Propagation>().unwrap(), policy);
        }
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(
            "requires new".parse::<Propagation>().unwrap(),
            Propagation::RequiresNew
        );
        assert!("SUPPORTS_MAYBE".parse::<Propagation>().is_err());
    }
}
