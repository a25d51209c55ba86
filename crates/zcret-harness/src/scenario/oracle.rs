//! Reusable oracles.

use zcret_client::SessionState;

use crate::scenario::{OracleFn, World};

/// Wrap a closure as an oracle.
pub fn check(f: impl FnOnce(&World) -> Result<(), String> + 'static) -> OracleFn {
    Box::new(f)
}

/// Every oracle must pass; stops at the first failure.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    check(move |world| {
        for oracle in oracles {
            oracle(world)?;
        }
        Ok(())
    })
}

/// Session ended in `expected`.
pub fn state_is(expected: SessionState) -> OracleFn {
    check(move |world| {
        let actual = world.session().state();
        if *actual == expected {
            Ok(())
        } else {
            Err(format!("expected state {expected}, got {actual}"))
        }
    })
}

/// Session is authenticated and history has been loaded.
pub fn authenticated() -> OracleFn {
    check(|world| {
        if *world.session().state() != SessionState::Authenticated {
            return Err(format!("not authenticated: {}", world.session().state()));
        }
        if !world.session().store().is_loaded() {
            return Err("history never loaded".into());
        }
        Ok(())
    })
}

/// Stored message contents, in order.
pub fn message_contents(expected: Vec<&'static str>) -> OracleFn {
    check(move |world| {
        let actual: Vec<&str> =
            world.session().messages().iter().map(|m| m.content.as_str()).collect();
        if actual == expected {
            Ok(())
        } else {
            Err(format!("expected messages {expected:?}, got {actual:?}"))
        }
    })
}

/// Some diagnostic entry contains `needle`.
pub fn logged(needle: &'static str) -> OracleFn {
    check(move |world| {
        if world.diagnostics().iter().any(|line| line.contains(needle)) {
            Ok(())
        } else {
            Err(format!("no diagnostic contains {needle:?}"))
        }
    })
}

/// Exactly `expected` dials were attempted.
pub fn dial_count(expected: usize) -> OracleFn {
    check(move |world| {
        let actual = world.dial_count();
        if actual == expected {
            Ok(())
        } else {
            Err(format!("expected {expected} dials, got {actual}"))
        }
    })
}
