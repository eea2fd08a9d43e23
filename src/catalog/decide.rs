//! Incremental decider (C6): pure function from current stat + prior
//! record to {SKIP, ADD, MOD}. No I/O beyond what the caller already did
//! to obtain `size`/`modified`; never hashes.

use crate::types::PriorRecord;
use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Add,
    Mod,
}

/// Grounded in `entry_needs_update`/`mtime_changed`, specialized to this
/// spec's exact-equality rule: no tolerance window, unlike the teacher's
/// `mtime_window_ns` CLI knob.
pub fn decide(size: u64, modified: DateTime<Utc>, prior: Option<&PriorRecord>) -> Decision {
    match prior {
        None => Decision::Add,
        Some(p) if p.size == size && p.modified == modified => Decision::Skip,
        Some(_) => Decision::Mod,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn no_prior_record_is_add() {
        assert_eq!(decide(100, ts(1000), None), Decision::Add);
    }

    #[test]
    fn matching_size_and_mtime_is_skip() {
        let prior = PriorRecord {
            size: 100,
            modified: ts(1000),
        };
        assert_eq!(decide(100, ts(1000), Some(&prior)), Decision::Skip);
    }

    #[test]
    fn mismatched_size_is_mod() {
        let prior = PriorRecord {
            size: 100,
            modified: ts(1000),
        };
        assert_eq!(decide(101, ts(1000), Some(&prior)), Decision::Mod);
    }

    #[test]
    fn mtime_drift_of_one_second_is_mod_not_tolerated() {
        let prior = PriorRecord {
            size: 100,
            modified: ts(1000),
        };
        assert_eq!(decide(100, ts(1001), Some(&prior)), Decision::Mod);
    }
}
