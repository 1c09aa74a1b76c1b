//! Retry combinator for transient timeouts.
//!
//! Ported from `tools.py`'s `retry` decorator, which wraps a call,
//! retries it up to `count` times on a matching exception, and either
//! re-raises or returns the last value depending on `raise_on_fail`.
//! Rust has no exception hierarchy to match against, so the split is
//! made explicit with two functions instead of a flag (spec.md §9's
//! redesign note): [`retry`] propagates the error once the budget is
//! exhausted, [`retry_or`] swallows it and returns a caller-supplied
//! fallback.

use log::warn;

use crate::error::IspError;

/// Calls `f` up to `count` times, returning the first success. If every
/// attempt fails, returns the last error. `count` must be at least 1;
/// `count == 1` means "try once, no retries".
pub fn retry<T>(
    call_name: &str,
    count: u32,
    mut f: impl FnMut() -> Result<T, IspError>,
) -> Result<T, IspError> {
    let mut last_err = None;
    for attempt in 1..=count.max(1) {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!("{call_name}: retry {attempt}/{count} failed: {err}");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or(IspError::RetryExceeded {
        call: call_name.to_string(),
        count,
    }))
}

/// Like [`retry`], but on exhaustion returns `fallback` instead of
/// propagating the error. Used where the source calls `retry(...,
/// raise_on_fail=False)` and treats a timed-out attempt as "no answer"
/// rather than a hard failure (e.g. `ReadPartID`'s ID-line read).
pub fn retry_or<T>(
    call_name: &str,
    count: u32,
    fallback: T,
    mut f: impl FnMut() -> Result<T, IspError>,
) -> T {
    for attempt in 1..=count.max(1) {
        match f() {
            Ok(value) => return value,
            Err(err) => warn!("{call_name}: retry {attempt}/{count} failed: {err}"),
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn succeeds_on_first_try() {
        let calls = Cell::new(0);
        let result = retry("probe", 3, || {
            calls.set(calls.get() + 1);
            Ok::<_, IspError>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = retry("probe", 3, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(IspError::IoClosed)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_propagates_after_budget_exhausted() {
        let result: Result<(), IspError> = retry("probe", 2, || Err(IspError::IoClosed));
        assert!(result.is_err());
    }

    #[test]
    fn retry_or_returns_fallback() {
        let value = retry_or("probe", 2, 99, || Err::<i32, _>(IspError::IoClosed));
        assert_eq!(value, 99);
    }
}
