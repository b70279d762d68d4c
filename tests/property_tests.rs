//! 调和策略的性质测试
//!
//! 对任意输入都必须成立的不变量：
//! - 关闭删除同步时，单边条目总是被传输
//! - 一端严格更新且晚于水位线时，方向确定
//! - 时间相同而大小不同时，从不选择方向
//! - 策略是纯函数
//!
//! Run with: cargo test --test property_tests

use gridsync_lib::core::{DecisionKind, DiffEntry, ReconciliationPolicy, SideInfo, Watermarks};
use proptest::prelude::*;

fn side() -> impl Strategy<Value = SideInfo> {
    (
        proptest::option::of(any::<i64>()),
        0u64..10_000,
        proptest::option::of("[0-9a-f]{4}"),
        any::<bool>(),
    )
        .prop_map(|(time, len, checksum, collection)| {
            let side = if collection {
                SideInfo::collection(time)
            } else {
                SideInfo::data_object(time, len)
            };
            match checksum {
                Some(c) if !collection => side.with_checksum(c),
                _ => side,
            }
        })
}

fn entry() -> impl Strategy<Value = DiffEntry> {
    (
        "[a-z]{1,8}(/[a-z]{1,8}){0,2}",
        proptest::option::of(side()),
        proptest::option::of(side()),
    )
        .prop_filter("at least one side", |(_, l, r)| l.is_some() || r.is_some())
        .prop_map(|(path, local, remote)| DiffEntry {
            path,
            local,
            remote,
        })
}

fn watermarks() -> impl Strategy<Value = Watermarks> {
    (
        prop_oneof![Just(0i64), 1i64..1_000_000],
        prop_oneof![Just(0i64), 1i64..1_000_000],
    )
        .prop_map(|(l, r)| Watermarks::new(l, r))
}

proptest! {
    /// 关闭删除同步时，单边条目只会上传或下载
    #[test]
    fn one_sided_always_transfers(side in side(), wm in watermarks(), path in "[a-z]{1,12}") {
        let policy = ReconciliationPolicy::new(wm, false);

        let up = policy.classify(&DiffEntry::local_only(path.clone(), side.clone()));
        prop_assert_eq!(up.kind, DecisionKind::Upload);

        let down = policy.classify(&DiffEntry::remote_only(path, side));
        prop_assert_eq!(down.kind, DecisionKind::Download);
    }

    /// 删除同步只会产生与缺失一端对应的删除
    #[test]
    fn deletes_match_missing_side(side in side(), wm in watermarks()) {
        let policy = ReconciliationPolicy::new(wm, true);

        let kind = policy.classify(&DiffEntry::local_only("p", side.clone())).kind;
        prop_assert!(matches!(kind, DecisionKind::Upload | DecisionKind::DeleteLocal));

        let kind = policy.classify(&DiffEntry::remote_only("p", side)).kind;
        prop_assert!(matches!(kind, DecisionKind::Download | DecisionKind::DeleteRemote));
    }

    /// 本地严格更新且晚于非零水位线 -> 上传；反之下载
    #[test]
    fn strictly_newer_side_wins(
        older in 1i64..500_000,
        delta in 1i64..500_000,
        since in 1i64..1_000_000,
        local_len in 0u64..1000,
        remote_len in 0u64..1000,
    ) {
        let newer = older + delta;
        prop_assume!(newer > since);
        let policy = ReconciliationPolicy::new(Watermarks::new(since, since), false);

        let up = DiffEntry::both(
            "p",
            SideInfo::data_object(Some(newer), local_len),
            SideInfo::data_object(Some(older), remote_len),
        );
        prop_assert_eq!(policy.classify(&up).kind, DecisionKind::Upload);

        let down = DiffEntry::both(
            "p",
            SideInfo::data_object(Some(older), local_len),
            SideInfo::data_object(Some(newer), remote_len),
        );
        prop_assert_eq!(policy.classify(&down).kind, DecisionKind::Download);
    }

    /// 时间相同、大小不同 -> 冲突，没有默认方向
    #[test]
    fn equal_times_different_lengths_conflict(
        time in 0i64..1_000_000,
        len in 0u64..1000,
        extra in 1u64..1000,
        wm in watermarks(),
        delete_on_sync in any::<bool>(),
    ) {
        let policy = ReconciliationPolicy::new(wm, delete_on_sync);
        let entry = DiffEntry::both(
            "p",
            SideInfo::data_object(Some(time), len),
            SideInfo::data_object(Some(time), len + extra),
        );
        prop_assert_eq!(policy.classify(&entry).kind, DecisionKind::SkipConflict);
    }

    /// 两端完全相同 -> 未变化
    #[test]
    fn identical_sides_unchanged(side in side(), wm in watermarks()) {
        let policy = ReconciliationPolicy::new(wm, true);
        let kind = policy.classify(&DiffEntry::both("p", side.clone(), side)).kind;
        // 两端都在水位线之后修改且没有 checksum 时无法证明一致
        prop_assert!(matches!(kind, DecisionKind::SkipUnchanged | DecisionKind::SkipConflict));
    }

    /// 任意时间戳和容差都不会 panic
    #[test]
    fn never_panics_on_any_timestamps(
        local in any::<i64>(),
        remote in any::<i64>(),
        tolerance in any::<i64>(),
        wm in watermarks(),
    ) {
        let policy = ReconciliationPolicy::new(wm, true).with_time_tolerance(tolerance);
        let entry = DiffEntry::both(
            "p",
            SideInfo::data_object(Some(local), 1),
            SideInfo::data_object(Some(remote), 1),
        );
        let _ = policy.classify(&entry);
    }

    /// 同样的输入总是得到同样的决策
    #[test]
    fn classification_is_deterministic(entry in entry(), wm in watermarks(), delete_on_sync in any::<bool>()) {
        let policy = ReconciliationPolicy::new(wm, delete_on_sync);
        let first = policy.classify(&entry);
        let second = policy.classify(&entry);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&first.entry, &entry);
    }

    /// 两端都存在时从不删除
    #[test]
    fn never_deletes_present_pairs(
        local in side(),
        remote in side(),
        wm in watermarks(),
    ) {
        let policy = ReconciliationPolicy::new(wm, true);
        let kind = policy.classify(&DiffEntry::both("p", local, remote)).kind;
        prop_assert!(!matches!(kind, DecisionKind::DeleteLocal | DecisionKind::DeleteRemote));
    }
}
