use std::fmt;

use ulid::Ulid;

/// Identifier of one query execution, unique in-process for the lifetime of
/// that query.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ExecutionId(Ulid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Ulid> for ExecutionId {
    fn from(id: Ulid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

/// How the engine resolves the sibling fields of one field set.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExecutionStrategy {
    /// Sibling fields resolve concurrently. The only strategy worth batching
    /// for, and the only one safe to delay fetches under.
    Parallel,
    /// Sibling fields resolve one after the other. Delaying any fetch would
    /// deadlock the next one.
    Serial,
}

/// Type tag of one resolved field value, as reported by the engine once a
/// field set has produced its values.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ValueShape {
    Scalar,
    Object,
    List(Vec<ValueShape>),
}

impl ValueShape {
    /// Number of objects this value contributes to the next level: one per
    /// object, recursing through arbitrarily nested lists, zero for scalars.
    pub fn object_count(&self) -> usize {
        match self {
            ValueShape::Scalar => 0,
            ValueShape::Object => 1,
            ValueShape::List(items) => items.iter().map(ValueShape::object_count).sum(),
        }
    }

    /// Total object count of a resolved field set, i.e. the number of
    /// strategy calls to expect one level deeper.
    pub fn count_objects(shapes: &[ValueShape]) -> usize {
        shapes.iter().map(ValueShape::object_count).sum()
    }
}
