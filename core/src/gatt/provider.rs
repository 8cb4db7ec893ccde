//! Application hooks for reads, writes and notification state
//!
//! Closures with the right signature implement the traits directly.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

use super::options::AccessOptions;
use super::uuid::GattUuid;
use crate::GattError;

/// Supplies the value for a read instead of the stored bytes.
///
/// The provider sees the full options, including the offset, and its result
/// is returned unchanged.
pub trait ReadProvider: Send + Sync {
    fn read(&self, options: &AccessOptions) -> Result<Vec<u8>, GattError>;
}

/// Vets a write before it is stored. An error leaves the stored value as it
/// was.
pub trait WriteProvider: Send + Sync {
    fn write(&self, value: &[u8], options: &AccessOptions) -> Result<(), GattError>;
}

/// Observes a characteristic starting or stopping notifications.
pub trait NotifyObserver: Send + Sync {
    fn notifying_changed(&self, uuid: &GattUuid, notifying: bool);
}

impl<F> ReadProvider for F
where
    F: Fn(&AccessOptions) -> Result<Vec<u8>, GattError> + Send + Sync,
{
    fn read(&self, options: &AccessOptions) -> Result<Vec<u8>, GattError> {
        self(options)
    }
}

impl<F> WriteProvider for F
where
    F: Fn(&[u8], &AccessOptions) -> Result<(), GattError> + Send + Sync,
{
    fn write(&self, value: &[u8], options: &AccessOptions) -> Result<(), GattError> {
        self(value, options)
    }
}

impl<F> NotifyObserver for F
where
    F: Fn(&GattUuid, bool) + Send + Sync,
{
    fn notifying_changed(&self, uuid: &GattUuid, notifying: bool) {
        self(uuid, notifying)
    }
}

/// Run application code, turning errors and panics into `Failed`.
pub(crate) fn guarded<T>(
    what: &str,
    call: impl FnOnce() -> Result<T, GattError>,
) -> Result<T, GattError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result.map_err(GattError::into_failure),
        Err(_) => {
            error!("{} callback panicked", what);
            Err(GattError::Failed(format!("{} callback panicked", what)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_passes_success_through() {
        assert_eq!(guarded("read", || Ok(vec![1u8])), Ok(vec![1u8]));
    }

    #[test]
    fn test_guarded_maps_errors_to_failed() {
        let result: Result<(), _> =
            guarded("write", || Err(GattError::NotPermitted("locked".into())));
        assert!(matches!(result, Err(GattError::Failed(_))));
    }

    #[test]
    fn test_guarded_catches_panics() {
        let result: Result<(), _> = guarded("write", || panic!("boom"));
        assert_eq!(
            result,
            Err(GattError::Failed("write callback panicked".into()))
        );
    }

    #[test]
    fn test_closures_are_providers() {
        let provider = |options: &AccessOptions| -> Result<Vec<u8>, GattError> {
            Ok(vec![options.offset as u8])
        };
        let provider: &dyn ReadProvider = &provider;
        assert_eq!(provider.read(&AccessOptions::with_offset(3)), Ok(vec![3]));
    }
}
