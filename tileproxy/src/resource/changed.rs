//! Three-way change classification of definition updates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How much a definition update invalidates cached output.
///
/// Ordered by severity, so combining field classifications is `max`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Changed {
    /// Identical definitions.
    #[default]
    No,
    /// Different, but cached output stays valid; only the record is rewritten.
    Safely,
    /// Cached output is stale and must be regenerated.
    Yes,
}

impl Changed {
    /// `severity` if the two values differ, `No` otherwise.
    pub fn when<T: PartialEq + ?Sized>(a: &T, b: &T, severity: Changed) -> Changed {
        if a != b {
            severity
        } else {
            Changed::No
        }
    }

    /// The more severe of the two.
    pub fn and(self, other: Changed) -> Changed {
        self.max(other)
    }
}

impl fmt::Display for Changed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Changed::No => write!(f, "no"),
            Changed::Safely => write!(f, "safely"),
            Changed::Yes => write!(f, "yes"),
        }
    }
}
