//! Transaction states.

use std::fmt;

/// Lifecycle of a transaction.
///
/// ```text
/// Created -> Started -> Committing -> Committed
///     \          \            \
///      +----------+------------+--> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// Registered with the manager, snapshot not fixed yet.
    Created,
    /// Snapshot fixed; reads and staging allowed.
    Started,
    /// Inside the commit pipeline.
    Committing,
    /// Durable and published.
    Committed,
    /// Discarded; nothing was logged or published.
    RolledBack,
}

impl TxnState {
    /// Whether the transaction has finished either way.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Started)
                | (Self::Started, Self::Committing)
                | (Self::Committing, Self::Committed)
                | (Self::Created | Self::Started | Self::Committing, Self::RolledBack)
        )
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        assert!(TxnState::Created.can_transition_to(TxnState::Started));
        assert!(TxnState::Started.can_transition_to(TxnState::Committing));
        assert!(TxnState::Committing.can_transition_to(TxnState::Committed));
        assert!(TxnState::Started.can_transition_to(TxnState::RolledBack));

        assert!(!TxnState::Created.can_transition_to(TxnState::Committing));
        assert!(!TxnState::Committed.can_transition_to(TxnState::RolledBack));
        assert!(!TxnState::RolledBack.can_transition_to(TxnState::Started));
    }

    #[test]
    fn finished_states() {
        assert!(TxnState::Committed.is_finished());
        assert!(TxnState::RolledBack.is_finished());
        assert!(!TxnState::Committing.is_finished());
    }
}
