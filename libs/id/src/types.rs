//! Identifier types.

use crate::macros::prefixed_id;

prefixed_id! {
    /// A user-defined proxy profile. Stable across runs.
    ProfileId => "prof"
}

prefixed_id! {
    /// One orchestration run, from `init` to `destroy`.
    RunId => "run"
}

impl RunId {
    /// Lowercase ULID text, suitable as a file name component.
    #[must_use]
    pub fn token(&self) -> String {
        self.ulid().to_string().to_lowercase()
    }
}
