//! Writers cleaving segments of one leaf while readers scan it.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, TimeZone, Utc};
use cps_common::DatasetId;
use cps_config::StoreConfig;
use cps_core::storage::{build_proxy, memory_caches};
use cps_core::{CellPass, SiteModel, TimeRange};

const WRITERS: i32 = 4;
const PASSES_PER_WRITER: i64 = 150;

#[test]
fn concurrent_writes_and_scans_stay_consistent() {
    let mut config = StoreConfig::default();
    config.segments.max_passes_per_segment = 16;
    let (mutable, immutable) = memory_caches();
    let storage = build_proxy(&config.storage, mutable, Some(immutable));
    let model = SiteModel::new(DatasetId::new(), config).expect("model");
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let model = &model;
                let storage = &storage;
                scope.spawn(move || {
                    for i in 0..PASSES_PER_WRITER {
                        // Interleave writers in time so every segment sees all of them.
                        let time = base + Duration::seconds(i * i64::from(WRITERS) + i64::from(w));
                        let cell = (i % 4) as u32;
                        model
                            .add_pass(storage, cell, 10, CellPass::at(w, time))
                            .expect("add");
                    }
                })
            })
            .collect();

        let reader = scope.spawn(|| {
            let mut scans = 0;
            loop {
                let finished = done.load(Ordering::Acquire);
                for cell in 0..4 {
                    let passes = model
                        .cell_passes(&storage, cell, 10, TimeRange::all())
                        .expect("scan");
                    assert!(passes.windows(2).all(|w| w[0].time <= w[1].time));
                }
                scans += 1;
                if finished {
                    return scans;
                }
            }
        });

        for writer in writers {
            writer.join().expect("writer");
        }
        done.store(true, Ordering::Release);
        assert!(reader.join().expect("reader") > 0);
    });

    let stats = model.stats();
    let total = (i64::from(WRITERS) * PASSES_PER_WRITER) as usize;
    assert_eq!(stats.passes, total);
    assert!(stats.segments > 1);

    let mut seen = 0;
    for cell in 0..4 {
        let passes = model
            .cell_passes(&storage, cell, 10, TimeRange::all())
            .expect("scan");
        assert!(passes.windows(2).all(|w| w[0].time < w[1].time));
        seen += passes.len();
    }
    assert_eq!(seen, total);
}
