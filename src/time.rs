// SPDX-License-Identifier: MIT OR Apache-2.0

//! Millisecond-since-epoch clock, with a test-only override so WAL/journal/
//! bloom-cache timestamp ordering can be asserted deterministically.

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    #[cfg(test)]
    {
        if let Some(cell) = NOW_OVERRIDE.get() {
            if let Some(value) = *cell.lock().expect("lock is poisoned") {
                return value;
            }
        }
    }

    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}

#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(test)]
static NOW_OVERRIDE: OnceLock<Mutex<Option<i64>>> = OnceLock::new();

#[cfg(test)]
pub(crate) fn set_now_for_test(value: Option<i64>) {
    let cell = NOW_OVERRIDE.get_or_init(|| Mutex::new(None));
    *cell.lock().expect("lock is poisoned") = value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_freezes_and_resets() {
        set_now_for_test(Some(1_700_000_000_000));
        assert_eq!(now_millis(), 1_700_000_000_000);
        assert_eq!(now_millis(), 1_700_000_000_000);

        set_now_for_test(None);
        assert!(now_millis() > 1_700_000_000_000);
    }
}
