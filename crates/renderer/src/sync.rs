//! Ownership protocol for the shared texture.
//!
//! Exactly one side may touch the texture at a time. Access rights only move
//! through [`OwnershipTracker::acquire`] and [`OwnershipTracker::release`], which
//! drive a [`HandoffBackend`] through drain, acquire, release and wait in that
//! order. The tracker never lets the state skip a step.

use std::fmt;

use tracing::{debug, trace};

use crate::error::SyncError;
use crate::types::DispatchGeometry;

/// Which side currently holds access rights to the shared texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Initial state; the display loop may sample the texture.
    GraphicsOwned,
    /// Graphics work is drained and the compute side has requested access.
    Acquiring,
    /// The kernel may write the texture; drawing is forbidden.
    ComputeOwned,
    /// Release is enqueued; waiting for compute work to complete.
    Releasing,
}

impl Ownership {
    /// The only state reachable from `self`.
    pub fn successor(self) -> Ownership {
        match self {
            Ownership::GraphicsOwned => Ownership::Acquiring,
            Ownership::Acquiring => Ownership::ComputeOwned,
            Ownership::ComputeOwned => Ownership::Releasing,
            Ownership::Releasing => Ownership::GraphicsOwned,
        }
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ownership::GraphicsOwned => "graphics-owned",
            Ownership::Acquiring => "acquiring",
            Ownership::ComputeOwned => "compute-owned",
            Ownership::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// Start and end of one kernel execution, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelTiming {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl KernelTiming {
    pub fn new(start_ns: u64, end_ns: u64) -> Self {
        Self { start_ns, end_ns }
    }

    /// Elapsed time; never negative even if the device reports skewed stamps.
    pub fn elapsed_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Device operations that make up one handoff.
///
/// Implementations only enqueue work; ordering and state checks belong to
/// [`OwnershipTracker`].
pub trait HandoffBackend {
    /// Waits until every graphics command that may read the texture is done.
    fn drain_graphics(&mut self) -> Result<(), SyncError>;
    /// Enqueues the compute side's claim on the texture.
    fn enqueue_acquire(&mut self) -> Result<(), SyncError>;
    /// Enqueues one kernel run over `geometry`, bracketed by timing marks.
    fn enqueue_dispatch(&mut self, geometry: &DispatchGeometry) -> Result<(), SyncError>;
    /// Enqueues the hand-back of the texture to the graphics side.
    fn enqueue_release(&mut self) -> Result<(), SyncError>;
    /// Blocks until all enqueued compute work has completed.
    fn finish(&mut self) -> Result<KernelTiming, SyncError>;
}

/// Holds the current [`Ownership`] and funnels every change of it.
#[derive(Debug)]
pub struct OwnershipTracker {
    state: Ownership,
    handoffs: u64,
}

impl Default for OwnershipTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnershipTracker {
    pub fn new() -> Self {
        Self {
            state: Ownership::GraphicsOwned,
            handoffs: 0,
        }
    }

    pub fn current(&self) -> Ownership {
        self.state
    }

    /// Number of completed compute round trips.
    pub fn completed_handoffs(&self) -> u64 {
        self.handoffs
    }

    pub fn ensure(&self, expected: Ownership) -> Result<(), SyncError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SyncError::NotOwned {
                expected,
                actual: self.state,
            })
        }
    }

    fn transition(&mut self, to: Ownership) -> Result<(), SyncError> {
        let from = self.state;
        if from.successor() != to {
            return Err(SyncError::IllegalTransition { from, to });
        }
        trace!(%from, %to, "shared texture ownership");
        self.state = to;
        Ok(())
    }

    /// Moves access rights from the graphics side to the compute side.
    pub fn acquire(&mut self, backend: &mut impl HandoffBackend) -> Result<(), SyncError> {
        self.ensure(Ownership::GraphicsOwned)?;
        backend.drain_graphics()?;
        self.transition(Ownership::Acquiring)?;
        backend.enqueue_acquire()?;
        self.transition(Ownership::ComputeOwned)
    }

    /// Enqueues a kernel run; only legal while the compute side owns the texture.
    pub fn dispatch(
        &self,
        backend: &mut impl HandoffBackend,
        geometry: &DispatchGeometry,
    ) -> Result<(), SyncError> {
        self.ensure(Ownership::ComputeOwned)?;
        backend.enqueue_dispatch(geometry)
    }

    /// Hands the texture back and waits for the compute side to finish.
    pub fn release(&mut self, backend: &mut impl HandoffBackend) -> Result<KernelTiming, SyncError> {
        self.ensure(Ownership::ComputeOwned)?;
        self.transition(Ownership::Releasing)?;
        backend.enqueue_release()?;
        let timing = backend.finish()?;
        self.transition(Ownership::GraphicsOwned)?;
        self.handoffs += 1;
        Ok(timing)
    }
}

/// Runs the whole acquire, dispatch, release sequence for one kernel pass.
#[derive(Debug, Clone, Copy)]
pub struct FrameSynchronizer {
    geometry: DispatchGeometry,
}

impl FrameSynchronizer {
    pub fn new(geometry: DispatchGeometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &DispatchGeometry {
        &self.geometry
    }

    /// Returns with the texture graphics-owned and the kernel complete.
    pub fn run(
        &self,
        tracker: &mut OwnershipTracker,
        backend: &mut impl HandoffBackend,
    ) -> Result<KernelTiming, SyncError> {
        tracker.acquire(backend)?;
        tracker.dispatch(backend, &self.geometry)?;
        let timing = tracker.release(backend)?;
        debug!(
            elapsed_ns = timing.elapsed_ns(),
            handoffs = tracker.completed_handoffs(),
            "kernel pass complete"
        );
        Ok(timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Step {
        Drain,
        Acquire,
        Dispatch([u32; 2]),
        Release,
        Finish,
    }

    #[derive(Default)]
    struct ScriptedBackend {
        steps: Vec<Step>,
        fail_on_dispatch: bool,
        clock: u64,
    }

    impl HandoffBackend for ScriptedBackend {
        fn drain_graphics(&mut self) -> Result<(), SyncError> {
            self.steps.push(Step::Drain);
            Ok(())
        }

        fn enqueue_acquire(&mut self) -> Result<(), SyncError> {
            self.steps.push(Step::Acquire);
            Ok(())
        }

        fn enqueue_dispatch(&mut self, geometry: &DispatchGeometry) -> Result<(), SyncError> {
            if self.fail_on_dispatch {
                return Err(SyncError::Device {
                    step: "dispatch",
                    message: "device lost".into(),
                });
            }
            self.steps.push(Step::Dispatch(geometry.global()));
            Ok(())
        }

        fn enqueue_release(&mut self) -> Result<(), SyncError> {
            self.steps.push(Step::Release);
            Ok(())
        }

        fn finish(&mut self) -> Result<KernelTiming, SyncError> {
            self.steps.push(Step::Finish);
            let start = self.clock;
            self.clock += 1_000;
            Ok(KernelTiming::new(start, self.clock))
        }
    }

    fn geometry() -> DispatchGeometry {
        DispatchGeometry::new([900, 600], [20, 10]).expect("geometry")
    }

    #[test]
    fn full_pass_runs_steps_in_protocol_order() {
        let mut tracker = OwnershipTracker::new();
        let mut backend = ScriptedBackend::default();
        let timing = FrameSynchronizer::new(geometry())
            .run(&mut tracker, &mut backend)
            .expect("pass");

        assert_eq!(
            backend.steps,
            vec![
                Step::Drain,
                Step::Acquire,
                Step::Dispatch([900, 600]),
                Step::Release,
                Step::Finish,
            ]
        );
        assert_eq!(tracker.current(), Ownership::GraphicsOwned);
        assert_eq!(tracker.completed_handoffs(), 1);
        assert_eq!(timing.elapsed_ns(), 1_000);
    }

    #[test]
    fn dispatch_is_refused_while_graphics_owned() {
        let tracker = OwnershipTracker::new();
        let mut backend = ScriptedBackend::default();
        let err = tracker.dispatch(&mut backend, &geometry()).unwrap_err();
        assert!(matches!(
            err,
            SyncError::NotOwned {
                expected: Ownership::ComputeOwned,
                actual: Ownership::GraphicsOwned,
            }
        ));
        assert!(backend.steps.is_empty());
    }

    #[test]
    fn drawing_is_refused_while_compute_owned() {
        let mut tracker = OwnershipTracker::new();
        let mut backend = ScriptedBackend::default();
        tracker.acquire(&mut backend).expect("acquire");
        assert!(tracker.ensure(Ownership::GraphicsOwned).is_err());
        tracker.release(&mut backend).expect("release");
        assert!(tracker.ensure(Ownership::GraphicsOwned).is_ok());
    }

    #[test]
    fn double_acquire_is_rejected() {
        let mut tracker = OwnershipTracker::new();
        let mut backend = ScriptedBackend::default();
        tracker.acquire(&mut backend).expect("first acquire");
        assert!(tracker.acquire(&mut backend).is_err());
        assert_eq!(backend.steps, vec![Step::Drain, Step::Acquire]);
    }

    #[test]
    fn release_without_acquire_is_rejected() {
        let mut tracker = OwnershipTracker::new();
        let mut backend = ScriptedBackend::default();
        assert!(tracker.release(&mut backend).is_err());
        assert!(backend.steps.is_empty());
    }

    #[test]
    fn skipping_a_state_is_illegal() {
        let mut tracker = OwnershipTracker::new();
        let err = tracker.transition(Ownership::ComputeOwned).unwrap_err();
        assert!(matches!(err, SyncError::IllegalTransition { .. }));
        assert_eq!(tracker.current(), Ownership::GraphicsOwned);
    }

    #[test]
    fn device_failure_leaves_graphics_locked_out() {
        let mut tracker = OwnershipTracker::new();
        let mut backend = ScriptedBackend {
            fail_on_dispatch: true,
            ..ScriptedBackend::default()
        };
        let err = FrameSynchronizer::new(geometry())
            .run(&mut tracker, &mut backend)
            .unwrap_err();
        assert!(matches!(err, SyncError::Device { step: "dispatch", .. }));
        assert_eq!(tracker.current(), Ownership::ComputeOwned);
        assert!(tracker.ensure(Ownership::GraphicsOwned).is_err());
    }

    #[test]
    fn scripted_frames_never_overlap_owners() {
        let sync = FrameSynchronizer::new(geometry());
        let mut tracker = OwnershipTracker::new();
        let mut backend = ScriptedBackend::default();
        let mut draws = 0;

        for frame in 0..6 {
            if frame % 2 == 0 {
                sync.run(&mut tracker, &mut backend).expect("pass");
            }
            tracker.ensure(Ownership::GraphicsOwned).expect("draw");
            draws += 1;
        }

        assert_eq!(draws, 6);
        assert_eq!(tracker.completed_handoffs(), 3);
        let drains = backend.steps.iter().filter(|s| **s == Step::Drain).count();
        let finishes = backend.steps.iter().filter(|s| **s == Step::Finish).count();
        assert_eq!(drains, 3);
        assert_eq!(finishes, 3);
    }

    #[test]
    fn timing_is_never_negative() {
        assert_eq!(KernelTiming::new(500, 200).elapsed_ns(), 0);
        assert_eq!(KernelTiming::new(200, 500).elapsed_ns(), 300);
    }

    #[test]
    fn successor_cycles_back_to_graphics() {
        let mut state = Ownership::GraphicsOwned;
        for _ in 0..4 {
            state = state.successor();
        }
        assert_eq!(state, Ownership::GraphicsOwned);
    }
}
