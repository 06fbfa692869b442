use thiserror::Error;

/// Why a string is not a valid identifier of the requested kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("empty {kind} id")]
    Empty { kind: &'static str },

    #[error("{kind} id {input:?} is not of the form {kind}_<ulid>")]
    Malformed { kind: &'static str, input: String },

    #[error("expected a {expected} id, found prefix {found:?}")]
    WrongKind {
        expected: &'static str,
        found: String,
    },

    #[error("{kind} id has a bad ULID part: {reason}")]
    BadUlid { kind: &'static str, reason: String },
}

impl IdError {
    /// The string was a well-formed id of a different kind.
    pub fn is_wrong_kind(&self) -> bool {
        matches!(self, IdError::WrongKind { .. })
    }
}

/// Split `{prefix}_{ulid}` and decode the ULID half.
pub(crate) fn parse_prefixed(prefix: &'static str, input: &str) -> Result<ulid::Ulid, IdError> {
    if input.is_empty() {
        return Err(IdError::Empty { kind: prefix });
    }

    let Some((found, rest)) = input.split_once('_') else {
        return Err(IdError::Malformed {
            kind: prefix,
            input: input.to_string(),
        });
    };

    if found != prefix {
        return Err(IdError::WrongKind {
            expected: prefix,
            found: found.to_string(),
        });
    }

    ulid::Ulid::from_string(rest).map_err(|e| IdError::BadUlid {
        kind: prefix,
        reason: e.to_string(),
    })
}
