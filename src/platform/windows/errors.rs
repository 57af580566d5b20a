use windows::Win32::Foundation::{E_ACCESSDENIED, HRESULT, WAIT_ABANDONED};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_NOT_FOUND,
    DXGI_ERROR_SESSION_DISCONNECTED, DXGI_ERROR_UNSUPPORTED,
};

use crate::error::CaptureError;

// Kernel wait code, surfaced through keyed-mutex waits.
const WAIT_ABANDONED_HR: HRESULT = HRESULT(WAIT_ABANDONED.0 as i32);

/// HRESULTs the desktop can produce at any time while running: mode
/// changes, fullscreen transitions, session lock/unlock, driver resets.
pub(crate) const SYSTEM_TRANSITION_ERRORS: &[HRESULT] = &[
    DXGI_ERROR_DEVICE_REMOVED,
    DXGI_ERROR_ACCESS_LOST,
    WAIT_ABANDONED_HR,
];

/// HRESULTs expected when (re)creating an output duplication.
pub(crate) const CREATE_DUPLICATION_ERRORS: &[HRESULT] = &[
    DXGI_ERROR_DEVICE_REMOVED,
    E_ACCESSDENIED,
    DXGI_ERROR_UNSUPPORTED,
    DXGI_ERROR_SESSION_DISCONNECTED,
];

/// HRESULTs expected while reading frame metadata out of an acquired frame.
pub(crate) const FRAME_METADATA_ERRORS: &[HRESULT] =
    &[DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_ACCESS_LOST];

/// HRESULTs expected while walking adapter outputs.
pub(crate) const ENUM_OUTPUTS_ERRORS: &[HRESULT] = &[DXGI_ERROR_NOT_FOUND];

/// Folds a raw platform error into the crate taxonomy: allow-listed codes
/// become a recoverable `SystemTransition`, anything else is fatal and
/// keeps its full error chain. `context` names the call site.
pub(crate) fn classify(
    err: windows::core::Error,
    expected: &[HRESULT],
    context: &'static str,
) -> CaptureError {
    if expected.contains(&err.code()) {
        log::debug!("expected platform error during {context}: {err:?}");
        CaptureError::SystemTransition(context)
    } else {
        CaptureError::Platform(anyhow::Error::from(err).context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use windows::Win32::Foundation::E_FAIL;

    #[test]
    fn allow_listed_codes_are_transient() {
        let err = windows::core::Error::from_hresult(DXGI_ERROR_ACCESS_LOST);
        let classified = classify(err, SYSTEM_TRANSITION_ERRORS, "frame acquire");
        assert_eq!(classified.class(), ErrorClass::Transient);
    }

    #[test]
    fn unknown_codes_are_fatal() {
        let err = windows::core::Error::from_hresult(E_FAIL);
        let classified = classify(err, SYSTEM_TRANSITION_ERRORS, "frame acquire");
        assert_eq!(classified.class(), ErrorClass::Fatal);
    }

    #[test]
    fn missing_output_is_transient_during_lookup() {
        let err = windows::core::Error::from_hresult(DXGI_ERROR_NOT_FOUND);
        let classified = classify(err, ENUM_OUTPUTS_ERRORS, "output lookup");
        assert_eq!(classified.class(), ErrorClass::Transient);
    }

    #[test]
    fn creation_list_accepts_access_denied() {
        let err = windows::core::Error::from_hresult(E_ACCESSDENIED);
        let classified = classify(err, CREATE_DUPLICATION_ERRORS, "duplication create");
        assert_eq!(classified.class(), ErrorClass::Transient);

        // The runtime list does not; a denied acquire is a real failure.
        let err = windows::core::Error::from_hresult(E_ACCESSDENIED);
        let classified = classify(err, SYSTEM_TRANSITION_ERRORS, "frame acquire");
        assert_eq!(classified.class(), ErrorClass::Fatal);
    }
}
