mod common;

use chrono::{TimeZone, Utc};
use common::TestHistory;
use execution_history::execution_store::{
    BatchStatus, ExecutionFilter, ExecutionReader, ExecutionRepository, NewStep,
};
use execution_history::lifecycle::{ExecutionQuery, LifecycleSettings};
use std::collections::HashSet;

fn ids(records: &[execution_history::ExecutionRecord]) -> Vec<i64> {
    records.iter().map(|r| r.id).collect()
}

#[test]
fn test_basic_round_trip() {
    let history = TestHistory::new();
    for (id, name) in [(0, "fee"), (1, "foo"), (2, "foo"), (3, "foo")] {
        history.insert("legacy", Some(id), name, BatchStatus::Completed);
    }
    let service = history.service(LifecycleSettings::default());

    let fee = service
        .list_executions(&ExecutionQuery::new(
            ExecutionFilter::Name("fee".to_string()),
            0,
            10,
        ))
        .unwrap();
    assert_eq!(ids(&fee.records), vec![0]);
    assert_eq!(fee.total_count, 1);

    let all = service
        .list_executions(&ExecutionQuery::new(ExecutionFilter::All, 0, 10))
        .unwrap();
    assert_eq!(all.records.len(), 4);
    assert_eq!(all.total_count, 4);
    let keys: HashSet<(i64, String)> = all
        .records
        .iter()
        .map(|r| (r.id, r.schema_target.clone()))
        .collect();
    assert_eq!(keys.len(), 4);
}

#[test]
fn test_jump_to_item_on_sparse_table() {
    let history = TestHistory::new();
    for id in [3, 8, 11, 20, 21, 40] {
        history.insert("legacy", Some(id), "import", BatchStatus::Completed);
    }
    let target = history.target("legacy");

    // Page 2 of size 2 starts at ordinal 4.
    let page = history
        .reader
        .list_executions(target, &ExecutionFilter::All, 4, 2, false)
        .unwrap();
    assert_eq!(ids(&page), vec![8, 3]);

    let beyond = history
        .reader
        .list_executions(target, &ExecutionFilter::All, 6, 2, false)
        .unwrap();
    assert!(beyond.is_empty());
}

#[test]
fn test_pagination_is_complete_for_every_page_size() {
    let history = TestHistory::new();
    let total = 23;
    for _ in 0..total {
        history.insert("current", None, "export", BatchStatus::Completed);
    }
    let target = history.target("current");
    let unpaged = history
        .reader
        .list_executions(target, &ExecutionFilter::All, 0, 1000, false)
        .unwrap();
    assert_eq!(unpaged.len(), total);

    for page_size in 1..=9u64 {
        let mut seen = Vec::new();
        let mut start = 0;
        loop {
            let page = history
                .reader
                .list_executions(target, &ExecutionFilter::All, start, page_size, false)
                .unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.len() as u64 <= page_size);
            seen.extend(ids(&page));
            start += page_size;
        }
        assert_eq!(seen, ids(&unpaged), "page size {}", page_size);
    }
}

#[test]
fn test_step_count_column() {
    let history = TestHistory::new();
    let id = history.insert("legacy", None, "import", BatchStatus::Completed);
    let target = history.target("legacy");
    history
        .repository
        .insert_step(target, id, &NewStep::started("read"))
        .unwrap();
    history
        .repository
        .insert_step(target, id, &NewStep::started("write"))
        .unwrap();

    let with_count = history
        .reader
        .list_executions(target, &ExecutionFilter::All, 0, 10, true)
        .unwrap();
    assert_eq!(with_count[0].step_count, Some(2));
    let without = history
        .reader
        .list_executions(target, &ExecutionFilter::All, 0, 10, false)
        .unwrap();
    assert_eq!(without[0].step_count, None);
}

#[test]
fn test_fan_out_pages_across_targets() {
    let history = TestHistory::new();
    for id in 1..=4 {
        history.insert("legacy", Some(id), "import", BatchStatus::Completed);
        history.insert("current", Some(id + 10), "import", BatchStatus::Completed);
    }
    let service = history.service(LifecycleSettings::default());

    let mut seen = Vec::new();
    for offset in (0..8).step_by(3) {
        let page = service
            .list_executions(&ExecutionQuery::new(ExecutionFilter::All, offset, 3))
            .unwrap();
        assert_eq!(page.total_count, 8);
        seen.extend(page.records.iter().map(|r| (r.id, r.schema_target.clone())));
    }
    assert_eq!(
        seen.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        vec![14, 13, 12, 11, 4, 3, 2, 1]
    );
}

#[test]
fn test_fan_out_pages_when_start_times_disagree_with_ids() {
    let history = TestHistory::new();
    let at = |minute: u32| Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap());
    // Lower ids start later than higher ones in both targets.
    for (id, minute) in [(1, 30), (2, 0), (3, 45), (4, 5)] {
        history.insert_started("legacy", Some(id), "import", BatchStatus::Completed, at(minute));
    }
    for (id, minute) in [(1, 10), (3, 50), (5, 1)] {
        history.insert_started("current", Some(id), "import", BatchStatus::Completed, at(minute));
    }
    let service = history.service(LifecycleSettings::default());

    let everything = service
        .list_executions(&ExecutionQuery::new(ExecutionFilter::All, 0, 100))
        .unwrap();
    let merged: Vec<(i64, String)> = everything
        .records
        .iter()
        .map(|r| (r.id, r.schema_target.clone()))
        .collect();
    assert_eq!(merged.len(), 7);

    for page_size in 1..=4u64 {
        let mut paged = Vec::new();
        let mut offset = 0;
        while offset < 7 {
            let page = service
                .list_executions(&ExecutionQuery::new(ExecutionFilter::All, offset, page_size))
                .unwrap();
            assert_eq!(page.total_count, 7);
            paged.extend(page.records.iter().map(|r| (r.id, r.schema_target.clone())));
            offset += page_size;
        }
        assert_eq!(paged, merged, "page size {}", page_size);
    }

    let first = service
        .list_executions(&ExecutionQuery::new(ExecutionFilter::All, 0, 1))
        .unwrap();
    assert_eq!(first.records[0].id, 5);
    assert_eq!(first.records[0].schema_target, "current");
}
