//! Completion records.

use crate::native::RawStatus;

/// Snapshot of a completed operation: who sent it, with which tag, and the
/// per-operation status code.
///
/// The default value is the empty record returned for requests that had
/// already completed: wildcard source and tag, success code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    raw: RawStatus,
}

impl Status {
    /// Rank of the participant the data came from.
    pub const fn source(&self) -> i32 {
        self.raw.source
    }

    /// Tag of the matched message.
    pub const fn tag(&self) -> i32 {
        self.raw.tag
    }

    /// Per-operation status code.
    pub const fn error(&self) -> i32 {
        self.raw.error
    }

    /// The native record this status was built from.
    pub const fn raw(&self) -> RawStatus {
        self.raw
    }
}

impl From<RawStatus> for Status {
    fn from(raw: RawStatus) -> Self {
        Self { raw }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{codes, ANY_SOURCE, ANY_TAG};

    #[test]
    fn empty_status_uses_wildcards() {
        let status = Status::default();
        assert_eq!(status.source(), ANY_SOURCE);
        assert_eq!(status.tag(), ANY_TAG);
        assert_eq!(status.error(), codes::SUCCESS);
    }
}
