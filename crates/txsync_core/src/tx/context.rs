//! Execution context identifiers.

use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Identifies one logical flow (request, job, thread of work).
///
/// Callers create one per unit of work and pass it explicitly to every
/// repository and transaction call. It carries no business data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionContext(Uuid);

impl ExecutionContext {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ExecutionContext {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Display for ExecutionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionContext;
    use uuid::Uuid;

    #[test]
    fn new_contexts_are_distinct() {
        assert_ne!(ExecutionContext::new(), ExecutionContext::new());
    }

    #[test]
    fn context_from_uuid_round_trips_id() {
        let id = Uuid::new_v4();
        assert_eq!(ExecutionContext::from(id).id(), id);
        assert_eq!(ExecutionContext::from(id).to_string(), id.to_string());
    }
}
