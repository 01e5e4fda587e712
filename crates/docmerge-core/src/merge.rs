//! The earliest/latest merge rule.
//!
//! Folding a [`Snapshot`] into the current [`CanonicalRecord`] only ever
//! widens the `[first_fetch_time, fetch_time]` window:
//!
//! | Condition | Effect |
//! |-----------|--------|
//! | no record yet | new record, both bounds = `snapshot.fetch_time` |
//! | `snapshot.fetch_time < record.first_fetch_time` | take `pub_date` and the new lower bound |
//! | `snapshot.fetch_time > record.fetch_time` | take `text` and the new upper bound |
//! | otherwise (inside or on a bound) | nothing changes |
//!
//! Both comparisons are strict, so a snapshot landing exactly on a bound
//! never overwrites the fields tied to that bound. Re-delivering any
//! snapshot already seen is therefore a no-op.

use serde::Serialize;

use crate::models::{CanonicalRecord, Snapshot};

/// What a merge did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MergeOutcome {
    /// First snapshot for this URL.
    Created,
    /// At least one bound moved.
    Widened { earlier: bool, later: bool },
    /// The snapshot fell inside (or on) the observed window.
    Unchanged,
}

impl MergeOutcome {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, MergeOutcome::Unchanged)
    }
}

/// Result of [`merge`]: the record to write plus what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge {
    pub record: CanonicalRecord,
    pub outcome: MergeOutcome,
}

/// Fold `snapshot` into `existing`.
///
/// The caller owns `existing` for the duration of the call; the returned
/// record is always the one to upsert, even when the outcome is
/// [`MergeOutcome::Unchanged`].
pub fn merge(existing: Option<CanonicalRecord>, snapshot: &Snapshot) -> Merge {
    let Some(mut record) = existing else {
        return Merge {
            record: CanonicalRecord::from_first(snapshot),
            outcome: MergeOutcome::Created,
        };
    };

    let earlier = snapshot.fetch_time < record.first_fetch_time;
    if earlier {
        record.pub_date = snapshot.pub_date;
        record.first_fetch_time = snapshot.fetch_time;
    }

    let later = snapshot.fetch_time > record.fetch_time;
    if later {
        record.text = snapshot.text.clone();
        record.fetch_time = snapshot.fetch_time;
    }

    let outcome = if earlier || later {
        MergeOutcome::Widened { earlier, later }
    } else {
        MergeOutcome::Unchanged
    };

    Merge { record, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(pub_date: i64, fetch_time: i64, text: &str) -> Snapshot {
        Snapshot {
            url: "u1".to_string(),
            pub_date,
            fetch_time,
            text: text.to_string(),
        }
    }

    fn fold(snapshots: &[Snapshot]) -> CanonicalRecord {
        let mut current = None;
        for s in snapshots {
            current = Some(merge(current, s).record);
        }
        current.expect("at least one snapshot")
    }

    #[test]
    fn test_new_url_creates_record() {
        let m = merge(None, &snap(100, 200, "v1"));
        assert_eq!(m.outcome, MergeOutcome::Created);
        assert_eq!(
            m.record,
            CanonicalRecord {
                url: "u1".to_string(),
                pub_date: 100,
                first_fetch_time: 200,
                fetch_time: 200,
                text: "v1".to_string(),
            }
        );
    }

    #[test]
    fn test_earlier_snapshot_moves_lower_bound_only() {
        let r1 = merge(None, &snap(100, 200, "v1")).record;
        let m = merge(Some(r1), &snap(50, 150, "v0"));
        assert_eq!(
            m.outcome,
            MergeOutcome::Widened {
                earlier: true,
                later: false
            }
        );
        assert_eq!(m.record.pub_date, 50);
        assert_eq!(m.record.first_fetch_time, 150);
        assert_eq!(m.record.fetch_time, 200);
        assert_eq!(m.record.text, "v1");
    }

    #[test]
    fn test_later_snapshot_moves_upper_bound_only() {
        let r = fold(&[snap(100, 200, "v1"), snap(50, 150, "v0")]);
        let m = merge(Some(r), &snap(999, 250, "v2"));
        assert_eq!(
            m.outcome,
            MergeOutcome::Widened {
                earlier: false,
                later: true
            }
        );
        assert_eq!(m.record.pub_date, 50);
        assert_eq!(m.record.first_fetch_time, 150);
        assert_eq!(m.record.fetch_time, 250);
        assert_eq!(m.record.text, "v2");
    }

    #[test]
    fn test_redelivery_inside_window_is_noop() {
        let r = fold(&[
            snap(100, 200, "v1"),
            snap(50, 150, "v0"),
            snap(999, 250, "v2"),
        ]);
        let m = merge(Some(r.clone()), &snap(100, 200, "v1"));
        assert!(m.outcome.is_unchanged());
        assert_eq!(m.record, r);
    }

    #[test]
    fn test_tie_on_bounds_never_overwrites() {
        let r = fold(&[snap(1, 100, "first"), snap(2, 300, "last")]);

        let on_lower = merge(Some(r.clone()), &snap(77, 100, "other"));
        assert!(on_lower.outcome.is_unchanged());
        assert_eq!(on_lower.record.pub_date, 1);

        let on_upper = merge(Some(r.clone()), &snap(77, 300, "other"));
        assert!(on_upper.outcome.is_unchanged());
        assert_eq!(on_upper.record.text, "last");
    }

    #[test]
    fn test_tie_on_single_point_record() {
        let r = fold(&[snap(1, 100, "first")]);
        let m = merge(Some(r), &snap(2, 100, "second"));
        assert!(m.outcome.is_unchanged());
        assert_eq!(m.record.pub_date, 1);
        assert_eq!(m.record.text, "first");
    }

    #[test]
    fn test_idempotent_under_repeat() {
        let s = snap(100, 200, "v1");
        let once = fold(&[s.clone()]);
        let twice = fold(&[s.clone(), s]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_order_independent_for_distinct_fetch_times() {
        let snaps = [
            snap(10, 400, "d"),
            snap(20, 100, "a"),
            snap(30, 300, "c"),
            snap(40, 200, "b"),
        ];
        let expected = CanonicalRecord {
            url: "u1".to_string(),
            pub_date: 20,
            first_fetch_time: 100,
            fetch_time: 400,
            text: "d".to_string(),
        };

        // Every permutation of the four snapshots.
        let mut idx = [0usize, 1, 2, 3];
        let mut seen = 0;
        loop {
            let ordered: Vec<Snapshot> = idx.iter().map(|&i| snaps[i].clone()).collect();
            assert_eq!(fold(&ordered), expected, "order {:?}", idx);
            seen += 1;
            if !next_permutation(&mut idx) {
                break;
            }
        }
        assert_eq!(seen, 24);
    }

    #[test]
    fn test_window_only_widens() {
        let times = [500, 300, 700, 300, 100, 900, 600, 100, 900];
        let mut current: Option<CanonicalRecord> = None;
        for (i, t) in times.iter().enumerate() {
            let next = merge(current.clone(), &snap(i as i64, *t, "x")).record;
            if let Some(prev) = &current {
                assert!(next.first_fetch_time <= prev.first_fetch_time);
                assert!(next.fetch_time >= prev.fetch_time);
            }
            assert!(next.first_fetch_time <= next.fetch_time);
            current = Some(next);
        }
        let r = current.unwrap();
        assert_eq!((r.first_fetch_time, r.fetch_time), (100, 900));
        // pub_date from the first snapshot that reached 100 (index 4)
        assert_eq!(r.pub_date, 4);
    }

    fn next_permutation(v: &mut [usize]) -> bool {
        let n = v.len();
        if n < 2 {
            return false;
        }
        let mut i = n - 1;
        while i > 0 && v[i - 1] >= v[i] {
            i -= 1;
        }
        if i == 0 {
            return false;
        }
        let mut j = n - 1;
        while v[j] <= v[i - 1] {
            j -= 1;
        }
        v.swap(i - 1, j);
        v[i..].reverse();
        true
    }
}
