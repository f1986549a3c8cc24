use crate::store::{StoreError, StoreErrorKind};

/// Runs an operation; when it fails with a recoverable "missing" condition,
/// performs a repair action and runs the operation exactly once more.
///
/// Any other failure, a failed repair, or a second failure after the repair
/// is returned unchanged.
pub struct CreateOnDemandRetryPolicy<P, R> {
    is_recoverable: P,
    repair: R,
}

impl<P, R> CreateOnDemandRetryPolicy<P, R> {
    pub fn new(is_recoverable: P, repair: R) -> Self {
        Self {
            is_recoverable,
            repair,
        }
    }

    pub fn attempt<T, E, F>(&mut self, mut operation: F) -> Result<T, E>
    where
        P: Fn(&E) -> bool,
        R: FnMut() -> Result<(), E>,
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display,
    {
        match operation() {
            Err(e) if (self.is_recoverable)(&e) => {
                debug!("repairing after recoverable failure: {}", e);
                (self.repair)()?;
                operation()
            }
            result => result,
        }
    }
}

/// Policy that repairs store errors of one specific kind.
pub fn on_store_error<R>(
    kind: StoreErrorKind,
    repair: R,
) -> CreateOnDemandRetryPolicy<impl Fn(&StoreError) -> bool, R>
where
    R: FnMut() -> Result<(), StoreError>,
{
    CreateOnDemandRetryPolicy::new(move |e: &StoreError| e.is_kind(&kind), repair)
}
