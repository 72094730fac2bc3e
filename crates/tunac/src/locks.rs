//! Lock requirements from an action sequence.
//!
//! A function whose actions yield an empty map can run concurrently with any
//! other invocation without coordination. Otherwise the map names the minimum
//! lock per global a coordinator would have to hold.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::summarize::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Read,
    Write,
}

impl LockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LockKind::Read => "read",
            LockKind::Write => "write",
        }
    }
}

pub type LockRequirements = BTreeMap<String, LockKind>;

/// Processes `actions` in order. Reads alone never need a lock. A mutation
/// needs a read lock on each global it depends on, and a write lock on a
/// dependency that is the mutated global itself. A global that an earlier
/// mutation depended on needs a write lock once it is mutated. Locks are never
/// downgraded.
pub fn calculate_lock_requirements(actions: &[Action]) -> LockRequirements {
    let mut reqs = LockRequirements::new();
    let mut depended_on: BTreeSet<&str> = BTreeSet::new();

    for action in actions {
        match action {
            Action::Get { .. } => {}
            Action::Mutate { global, depends_on } => {
                for dep in depends_on {
                    let kind = if dep == global || reqs.get(dep) == Some(&LockKind::Write) {
                        LockKind::Write
                    } else {
                        LockKind::Read
                    };
                    reqs.insert(dep.clone(), kind);
                    depended_on.insert(dep.as_str());
                }
                if depended_on.contains(global.as_str()) {
                    reqs.insert(global.clone(), LockKind::Write);
                }
            }
        }
    }
    reqs
}
