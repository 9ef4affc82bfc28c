//! DNSSEC security verdicts (spec §3, §4.3, §7).

use std::fmt;

/// The four security verdicts a message or RRset can carry, plus the
/// pre-verification default.
///
/// Transitions are one-way: `Unchecked` may move to any of the other four,
/// but once an RRset is `Secure` or `Bogus` that verdict sticks for its
/// lifetime (spec §3 invariants). [`SecurityStatus::transition_to`] enforces
/// this so a caller cannot accidentally downgrade a verified result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityStatus {
    #[default]
    Unchecked,
    Indeterminate,
    Insecure,
    Bogus,
    Secure,
}

impl SecurityStatus {
    /// True once this status is final and must not be recomputed.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Secure | Self::Bogus)
    }

    /// Attempt to move to `next`. Returns `next` unless `self` is already
    /// final, in which case the final status is kept (spec: "once secure or
    /// bogus it sticks for the lifetime of that RRset").
    pub fn transition_to(self, next: Self) -> Self {
        if self.is_final() {
            self
        } else {
            next
        }
    }
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unchecked => "unchecked",
            Self::Indeterminate => "indeterminate",
            Self::Insecure => "insecure",
            Self::Bogus => "bogus",
            Self::Secure => "secure",
        };
        f.write_str(s)
    }
}
