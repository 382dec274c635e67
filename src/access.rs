//! Authorization boundary.
//!
//! Policy lives outside the library. Every entry point asks a [`Gate`]
//! one yes/no question before touching storage or records, and fails with
//! a `Forbidden` error on "no".

use crate::types::MediaRecord;
use std::fmt;

/// What the actor is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ability {
    Upload,
    View,
    Update,
    Process,
    Delete,
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upload => "upload",
            Self::View => "view",
            Self::Update => "update",
            Self::Process => "process",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Answers "may `actor` do `ability` (to `record`)?".
///
/// `record` is `None` for uploads, which have no record yet.
pub trait Gate: Send + Sync {
    fn allows(&self, actor: &str, ability: Ability, record: Option<&MediaRecord>) -> bool;
}

/// Permits everything. The default when no policy is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Gate for AllowAll {
    fn allows(&self, _actor: &str, _ability: Ability, _record: Option<&MediaRecord>) -> bool {
        true
    }
}

/// Any matching closure is a gate.
impl<F> Gate for F
where
    F: Fn(&str, Ability, Option<&MediaRecord>) -> bool + Send + Sync,
{
    fn allows(&self, actor: &str, ability: Ability, record: Option<&MediaRecord>) -> bool {
        self(actor, ability, record)
    }
}
