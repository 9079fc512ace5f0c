// state.rs - Tuple state management

/// Lifecycle state of a tuple.
///
/// `Creating -> Ok`, `Ok -> Updating -> Ok`, `Ok | Updating -> Dying -> Dead`.
/// A tuple retracted while still `Creating` becomes `Aborting` and dies
/// without any downstream effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TupleState {
    /// Inserted but not yet propagated
    Creating,
    /// Stable and visible downstream
    Ok,
    /// Changed since the last propagation
    Updating,
    /// Retracted; downstream still has to see the retract
    Dying,
    /// Retracted before it was ever propagated
    Aborting,
    /// Released
    #[default]
    Dead,
}

impl TupleState {
    /// Returns true if the tuple waits in a dirty queue.
    pub fn is_dirty(&self) -> bool {
        matches!(
            self,
            TupleState::Creating | TupleState::Updating | TupleState::Dying | TupleState::Aborting
        )
    }

    /// Returns true if downstream nodes currently see this tuple.
    pub fn is_live(&self) -> bool {
        matches!(self, TupleState::Ok | TupleState::Updating)
    }
}
