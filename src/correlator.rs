//! Input correlator.
//!
//! Repeated scan that links memory value changes to an external input
//! activation signal. Every tick re-reads memory and walks each comparable
//! region: a changed element's label moves +1 while the activation condition
//! holds and -1 otherwise (wrapping at the label width); unchanged elements
//! keep their label. On a normal stop, elements with a strictly positive
//! label survive into the snapshot handed to the downstream thresholding
//! consumer.

use crate::config::SettingsProvider;
use crate::input::{ActivationRecord, InputSource, InputSubscription};
use crate::memory::ProcessMemory;
use crate::repository::SnapshotRepository;
use crate::sched::{Capability, RepeatedScan};
use crate::snapshot::{IterateMode, ScanLabel, Snapshot};
use crate::task::TaskProgress;
use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;
use log::{Level, debug, info, log_enabled, warn};
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const SCAN_NAME: &str = "input correlator";

/// End-of-scan retention: keep exactly the elements whose label is strictly
/// positive and drop regions left with no valid element. Idempotent.
pub fn apply_retention_filter<L: ScanLabel>(snapshot: &mut Snapshot<L>) {
    snapshot.set_all_valid_bits(false);
    for region in snapshot.regions_mut() {
        region.for_each_element_mut(IterateMode::LabelsOnly, |element| {
            if element.label().is_positive() {
                element.set_valid(true);
            }
        });
    }
    snapshot.discard_invalid_regions();
}

pub struct InputCorrelator<L: ScanLabel> {
    memory: Arc<dyn ProcessMemory>,
    repository: Arc<dyn SnapshotRepository<L>>,
    input: Arc<dyn InputSource>,
    settings: Arc<dyn SettingsProvider>,
    sink: Sender<Snapshot<L>>,
    activation: Arc<ActivationRecord>,
    // Per-scan state, populated by begin and released by end.
    snapshot: Option<Snapshot<L>>,
    subscription: Option<InputSubscription>,
    pool: Option<rayon::ThreadPool>,
    timeout_ms: u64,
    ticks: u64,
}

impl<L: ScanLabel> InputCorrelator<L> {
    pub fn new(
        memory: Arc<dyn ProcessMemory>,
        repository: Arc<dyn SnapshotRepository<L>>,
        input: Arc<dyn InputSource>,
        settings: Arc<dyn SettingsProvider>,
        sink: Sender<Snapshot<L>>,
    ) -> Self {
        Self {
            memory,
            repository,
            input,
            settings,
            sink,
            activation: ActivationRecord::new(),
            snapshot: None,
            subscription: None,
            pool: None,
            timeout_ms: 0,
            ticks: 0,
        }
    }

    /// The record input sources write activation edges into.
    pub fn activation_record(&self) -> Arc<ActivationRecord> {
        Arc::clone(&self.activation)
    }

    #[cfg(test)]
    fn scan_snapshot(&self) -> Option<&Snapshot<L>> {
        self.snapshot.as_ref()
    }
}

impl<L: ScanLabel> RepeatedScan for InputCorrelator<L> {
    fn name(&self) -> &str {
        SCAN_NAME
    }

    fn required_capability(&self) -> Option<Capability> {
        Some(Capability::SnapshotPrefilter)
    }

    fn begin(&mut self) -> Result<()> {
        let settings = self.settings.settings();
        self.timeout_ms = settings.input_timeout_ms;
        self.pool = Some(settings.build_pool()?);
        self.ticks = 0;

        let active = self
            .repository
            .active(true)?
            .ok_or_else(|| anyhow!("no active snapshot obtainable"))?;

        let mut snapshot = active.clone_for_scan(SCAN_NAME);
        snapshot.set_element_labels(L::zero());

        // Scoped acquisition: the guard is released on every exit path of
        // end, including failure.
        self.subscription = Some(self.input.subscribe(Arc::clone(&self.activation))?);

        info!(
            "{} started: {} regions, {} elements, label width {}, timeout {}ms",
            SCAN_NAME,
            snapshot.region_count(),
            snapshot.element_count(),
            snapshot.label_width(),
            self.timeout_ms
        );

        self.snapshot = Some(snapshot);
        Ok(())
    }

    fn update(&mut self, progress: &TaskProgress) -> Result<()> {
        let snapshot = self
            .snapshot
            .as_mut()
            .ok_or_else(|| anyhow!("correlator ticked without an active snapshot"))?;
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| anyhow!("correlator ticked without a worker pool"))?;

        let condition_valid = self.activation.is_active_within(self.timeout_ms);
        let total = snapshot.region_count() as u64;
        let processed = AtomicU64::new(0);
        let memory = &*self.memory;

        // Each region is one unit of work: its read blocks only the worker
        // handling it, and region order never affects the result.
        pool.install(|| {
            snapshot.regions_mut().par_iter_mut().for_each(|region| {
                match region.read_from(memory) {
                    Err(e) => {
                        // Not comparable this tick only; retried next tick.
                        if log_enabled!(Level::Debug) {
                            debug!("{:#}", e);
                        }
                    }
                    Ok(()) if region.can_compare() => {
                        region.for_each_element_mut(IterateMode::ValuesAndLabels, |element| {
                            if element.changed() {
                                let label = element.label();
                                element.set_label(if condition_valid {
                                    label.incr()
                                } else {
                                    label.decr()
                                });
                            }
                        });
                    }
                    Ok(()) => {} // first read only seeds the buffers
                }

                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                progress.publish(done, total);
            });
        });

        snapshot.mark_updated();
        self.ticks += 1;

        if log_enabled!(Level::Debug) {
            debug!(
                "{} tick {}: condition {}, {} regions",
                SCAN_NAME,
                self.ticks,
                if condition_valid { "valid" } else { "invalid" },
                total
            );
        }

        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        // Take both up front: the subscription guard and the snapshot
        // reference are released even if the rest of end fails.
        let _subscription = self.subscription.take();
        let snapshot = self.snapshot.take();
        self.pool = None;

        let mut snapshot =
            snapshot.ok_or_else(|| anyhow!("correlator ended without an active snapshot"))?;

        apply_retention_filter(&mut snapshot);

        let retained: usize = snapshot
            .regions()
            .iter()
            .map(|region| region.valid_element_count())
            .sum();
        info!(
            "{} finished after {} ticks: {} regions, {} retained elements",
            SCAN_NAME,
            self.ticks,
            snapshot.region_count(),
            retained
        );

        self.repository.save(snapshot.clone())?;
        if self.sink.send(snapshot).is_err() {
            warn!("downstream consumer dropped before receiving the correlator result");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanSettings;
    use crate::memory::RegionKind;
    use crate::memory::mock::MockMemory;
    use crate::repository::ActiveSnapshotStore;
    use crate::snapshot::SnapshotRegion;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct TestInput {
        subscribed: Arc<AtomicBool>,
    }

    impl InputSource for TestInput {
        fn subscribe(&self, _record: Arc<ActivationRecord>) -> Result<InputSubscription> {
            self.subscribed.store(true, Ordering::Relaxed);
            let flag = Arc::clone(&self.subscribed);
            Ok(InputSubscription::new(move || {
                flag.store(false, Ordering::Relaxed)
            }))
        }
    }

    struct EmptyRepository;

    impl SnapshotRepository<i16> for EmptyRepository {
        fn active(&self, _create_if_none: bool) -> Result<Option<Snapshot<i16>>> {
            Ok(None)
        }

        fn save(&self, _snapshot: Snapshot<i16>) -> Result<()> {
            Ok(())
        }
    }

    fn settings() -> ScanSettings {
        ScanSettings {
            input_timeout_ms: 50,
            parallelism: 1,
            ..Default::default()
        }
    }

    fn correlator_fixture(
        mem: Arc<MockMemory>,
        subscribed: Arc<AtomicBool>,
    ) -> (InputCorrelator<i16>, crossbeam_channel::Receiver<Snapshot<i16>>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let repository = Arc::new(ActiveSnapshotStore::<i16>::new(
            Arc::clone(&mem) as Arc<dyn ProcessMemory>,
            settings(),
        ));
        let (sink, results) = crossbeam_channel::unbounded();
        let correlator = InputCorrelator::new(
            mem,
            repository,
            Arc::new(TestInput { subscribed }),
            Arc::new(settings()),
            sink,
        );
        (correlator, results)
    }

    #[test]
    fn correlates_changes_with_the_activation_signal() {
        let mem = Arc::new(MockMemory::new());
        mem.add_region(0x1000, 16, RegionKind::Heap, None);
        for (i, value) in [10u32, 20, 30, 40].iter().enumerate() {
            mem.write_u32(0x1000 + i as u64 * 4, *value).unwrap();
        }

        let subscribed = Arc::new(AtomicBool::new(false));
        let (mut correlator, results) = correlator_fixture(Arc::clone(&mem), Arc::clone(&subscribed));
        let activation = correlator.activation_record();
        let progress = TaskProgress::new();

        correlator.begin().unwrap();
        assert!(subscribed.load(Ordering::Relaxed));

        // Tick 1 seeds previous buffers: no label may change.
        correlator.update(&progress).unwrap();
        let labels = |c: &InputCorrelator<i16>| -> Vec<i16> {
            let region = &c.scan_snapshot().unwrap().regions()[0];
            (0..4).map(|i| region.label(i)).collect()
        };
        assert_eq!(labels(&correlator), vec![0, 0, 0, 0]);

        // Tick 2: condition valid, elements 0 and 2 changed.
        mem.write_u32(0x1000, 11).unwrap();
        mem.write_u32(0x1008, 31).unwrap();
        activation.touch();
        correlator.update(&progress).unwrap();
        assert_eq!(labels(&correlator), vec![1, 0, 1, 0]);
        assert_eq!(progress.snapshot(), (1, 1));

        // Tick 3: condition invalid, elements 0 and 1 changed.
        std::thread::sleep(Duration::from_millis(60));
        mem.write_u32(0x1000, 12).unwrap();
        mem.write_u32(0x1004, 21).unwrap();
        correlator.update(&progress).unwrap();
        assert_eq!(labels(&correlator), vec![0, -1, 1, 0]);

        correlator.end().unwrap();
        assert!(!subscribed.load(Ordering::Relaxed), "subscription released");

        // Only element index 2 survives the retention filter.
        let result = results.try_recv().unwrap();
        assert_eq!(result.region_count(), 1);
        let region = &result.regions()[0];
        assert_eq!(region.valid_element_count(), 1);
        assert!(region.is_valid(2));
        assert!(!region.is_valid(0));
        assert_eq!(region.label(2), 1);
    }

    #[test]
    fn unreadable_region_is_skipped_for_the_tick_and_retried() {
        let mem = Arc::new(MockMemory::new());
        mem.add_region(0x1000, 16, RegionKind::Heap, None);

        let subscribed = Arc::new(AtomicBool::new(false));
        let (mut correlator, _results) = correlator_fixture(Arc::clone(&mem), subscribed);
        let progress = TaskProgress::new();

        correlator.begin().unwrap();
        correlator.update(&progress).unwrap();
        correlator.update(&progress).unwrap();
        assert!(correlator.scan_snapshot().unwrap().regions()[0].can_compare());

        mem.set_faulty(0x1000, true);
        mem.write_u32(0x1000, 99).unwrap();
        correlator.update(&progress).unwrap();
        let region = &correlator.scan_snapshot().unwrap().regions()[0];
        assert!(!region.can_compare(), "unreadable tick is not comparable");
        assert_eq!(region.label(0), 0, "no label movement on a failed read");

        mem.set_faulty(0x1000, false);
        correlator.update(&progress).unwrap();
        assert!(correlator.scan_snapshot().unwrap().regions()[0].can_compare());
    }

    #[test]
    fn begin_fails_fast_without_an_active_snapshot() {
        let mem = Arc::new(MockMemory::new());
        let subscribed = Arc::new(AtomicBool::new(false));
        let (sink, _results) = crossbeam_channel::unbounded();
        let mut correlator = InputCorrelator::<i16>::new(
            mem,
            Arc::new(EmptyRepository),
            Arc::new(TestInput {
                subscribed: Arc::clone(&subscribed),
            }),
            Arc::new(settings()),
            sink,
        );

        assert!(correlator.begin().is_err());
        assert!(!subscribed.load(Ordering::Relaxed), "no dangling subscription");
    }

    #[test]
    fn retention_filter_is_idempotent() {
        let mut region = SnapshotRegion::<i16>::new(0x1000, 16, 4, 4);
        region.set_label(1, 3);
        region.set_label(3, -2);
        let empty = SnapshotRegion::<i16>::new(0x2000, 16, 4, 4);
        let mut snapshot = Snapshot::new("filter", vec![region, empty]);

        apply_retention_filter(&mut snapshot);
        let first: Vec<(u64, usize)> = snapshot
            .regions()
            .iter()
            .map(|r| (r.base_address(), r.valid_element_count()))
            .collect();
        assert_eq!(first, vec![(0x1000, 1)]);
        assert!(snapshot.regions()[0].is_valid(1));

        apply_retention_filter(&mut snapshot);
        let second: Vec<(u64, usize)> = snapshot
            .regions()
            .iter()
            .map(|r| (r.base_address(), r.valid_element_count()))
            .collect();
        assert_eq!(first, second);
        assert!(snapshot.regions()[0].is_valid(1));
    }
}
