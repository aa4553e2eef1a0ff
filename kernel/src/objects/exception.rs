//! Exception bindings
//!
//! An `ExceptionBinding` forwards exception and lifecycle reports from a
//! target task (job, process or thread) to a port. The port and key are
//! fixed at creation; the target is set once by `set_target` and cleared by
//! whichever side tears down first.
//!
//! ## States
//!
//! ```text
//! Unbound ──set_target──▶ Bound ──unbind / on_target_unbind──▶ Unbound
//!                           │
//!                           └──on_port_zero_handles──▶ Inert (no port, no target)
//! ```
//!
//! ## Lock Order
//!
//! The binding lock is always released before the port lock is taken. The
//! port only accepts binding-list changes together with a `BindingUnlocked`
//! token, and the only way to obtain one is to hand over the binding's lock
//! guard. Task slot locks are never held while calling into a binding.
//!
//! `set_target`, `unbind` and `on_target_unbind` also hold the binding's
//! link lock from the target change until the port list matches it, so a
//! port never keeps a link for a binding that lost its target meanwhile.
//! Order: link lock → binding lock (released) → port lock.

use alloc::sync::Arc;
use core::fmt;

use log::{debug, trace, warn};
use spin::{Mutex, MutexGuard};

use super::dispatcher::{impl_dispatcher_any, Dispatcher, ObjectType};
use super::handle::Rights;
use super::kobject::{KernelObject, Koid, ObjectBase};
use super::port::{PacketPayload, Port, PortPacket};
use super::signals::Signals;
use super::task::{Task, TaskKind};
use crate::arch::aarch64::exception::classify_syndrome;
use crate::arch::ArchExceptionContext;
use crate::error::{KError, Result};

/// What a binding is installed as on its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    None,
    /// Debugger slot of a job (process lifecycle events)
    JobDebugger,
    /// Debugger slot of a process (first chance on every thread exception)
    Debugger,
    /// Exception slot of a thread
    Thread,
    /// Exception slot of a process
    Process,
    /// Exception slot of a job
    Job,
}

impl BindingType {
    /// Task kind a binding of this type may target
    pub fn target_kind(self) -> Option<TaskKind> {
        match self {
            BindingType::None => None,
            BindingType::Thread => Some(TaskKind::Thread),
            BindingType::Process | BindingType::Debugger => Some(TaskKind::Process),
            BindingType::Job | BindingType::JobDebugger => Some(TaskKind::Job),
        }
    }

    /// Check whether this is a debugger slot
    pub fn is_debugger(self) -> bool {
        matches!(self, BindingType::Debugger | BindingType::JobDebugger)
    }

    pub fn from_raw(raw: u64) -> Result<Self> {
        match raw {
            0 => Ok(BindingType::None),
            1 => Ok(BindingType::JobDebugger),
            2 => Ok(BindingType::Debugger),
            3 => Ok(BindingType::Thread),
            4 => Ok(BindingType::Process),
            5 => Ok(BindingType::Job),
            _ => Err(KError::InvalidArgs),
        }
    }
}

/// Exception and lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionType {
    General,
    FatalPageFault,
    UndefinedInstruction,
    SwBreakpoint,
    HwBreakpoint,
    UnalignedAccess,
    ThreadStarting,
    ThreadExiting,
    PolicyError,
    ProcessStarting,
}

impl ExceptionType {
    /// Classify a synchronous fault from its ESR value
    pub fn from_syndrome(esr: u64) -> Self {
        classify_syndrome(esr)
    }

    /// Check whether this is a lifecycle report rather than a fault
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            ExceptionType::ThreadStarting
                | ExceptionType::ThreadExiting
                | ExceptionType::ProcessStarting
        )
    }
}

/// Report queued on a port for one exception or lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionReport {
    pub kind: ExceptionType,
    /// Process koid
    pub pid: Koid,
    /// Thread koid (`Koid::INVALID` for process-level events)
    pub tid: Koid,
    pub context: ArchExceptionContext,
}

impl ExceptionReport {
    /// Build a report for `task`, capturing its saved registers for threads
    pub fn capture(task: &Task, kind: ExceptionType) -> Self {
        match task.kind() {
            TaskKind::Thread => Self {
                kind,
                pid: task.parent().map_or(Koid::INVALID, |process| process.koid()),
                tid: task.koid(),
                context: ArchExceptionContext::capture(&task.frame()),
            },
            TaskKind::Process | TaskKind::Job => Self {
                kind,
                pid: task.koid(),
                tid: Koid::INVALID,
                context: ArchExceptionContext::default(),
            },
        }
    }
}

/// Proof that the caller holds no `ExceptionBinding` lock
///
/// Required by the port's binding-list mutators.
pub struct BindingUnlocked {
    _private: (),
}

impl BindingUnlocked {
    fn release(guard: MutexGuard<'_, BindingState>) -> Self {
        drop(guard);
        Self { _private: () }
    }
}

struct BindingState {
    port: Option<Arc<Port>>,
    target: Option<Arc<Task>>,
}

/// Binding from a port to a task's exception slot
pub struct ExceptionBinding {
    base: KernelObject,
    kind: BindingType,
    key: u64,
    link: Mutex<()>,
    state: Mutex<BindingState>,
}

impl ExceptionBinding {
    /// Create an unbound binding delivering to `port` with `key`
    pub fn create(kind: BindingType, port: Arc<Port>, key: u64) -> Arc<Self> {
        let binding = Arc::new(Self {
            base: KernelObject::with_signals(Signals::empty()),
            kind,
            key,
            link: Mutex::new(()),
            state: Mutex::new(BindingState {
                port: Some(port),
                target: None,
            }),
        });
        trace!(
            "[exception] created {} {:?} key {:#x}",
            binding.base.koid(),
            kind,
            key
        );
        binding
    }

    #[inline]
    pub fn kind(&self) -> BindingType {
        self.kind
    }

    #[inline]
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Check whether a target is set
    pub fn is_bound(&self) -> bool {
        self.state.lock().target.is_some()
    }

    /// Check whether both the port and the target are gone
    pub fn is_inert(&self) -> bool {
        let state = self.state.lock();
        state.port.is_none() && state.target.is_none()
    }

    /// Current target, if bound
    pub fn target(&self) -> Option<Arc<Task>> {
        self.state.lock().target.clone()
    }

    /// Bind to `target` and register with the port
    ///
    /// Does not touch the target's slots; `Task::install_binding` does that.
    ///
    /// # Errors
    /// `BadState` if already bound or if the port has closed.
    pub fn set_target(self: &Arc<Self>, target: Arc<Task>) -> Result<()> {
        let _link = self.link.lock();
        let mut state = self.state.lock();
        if state.target.is_some() {
            return Err(KError::BadState);
        }
        let port = state.port.clone().ok_or(KError::BadState)?;
        let target_koid = target.koid();
        state.target = Some(target);
        let unlocked = BindingUnlocked::release(state);

        if let Err(err) = port.link_binding(self, unlocked) {
            // The port closed between our check and the link.
            self.state.lock().target = None;
            return Err(err);
        }
        debug!(
            "[exception] {} bound to {} as {:?}",
            self.base.koid(),
            target_koid,
            self.kind
        );
        Ok(())
    }

    /// Explicitly detach from the target
    ///
    /// # Errors
    /// `BadState` if not bound.
    pub fn unbind(&self) -> Result<()> {
        let _link = self.link.lock();
        let mut state = self.state.lock();
        let target = state.target.take().ok_or(KError::BadState)?;
        let port = state.port.clone();
        let unlocked = BindingUnlocked::release(state);
        if let Some(port) = port {
            port.unlink_binding(self, unlocked);
        }
        target.clear_binding(self);
        debug!("[exception] {} unbound from {}", self.base.koid(), target.koid());
        Ok(())
    }

    /// Queue a report for `task` on the port
    ///
    /// # Errors
    /// - `BadState` if unbound or the port has closed
    /// - `ShouldWait` if the port is full
    pub fn send_packet(&self, task: &Task, kind: ExceptionType) -> Result<()> {
        let port = {
            let state = self.state.lock();
            if state.target.is_none() {
                return Err(KError::BadState);
            }
            state.port.clone().ok_or(KError::BadState)?
        };
        let report = ExceptionReport::capture(task, kind);
        port.queue(PortPacket {
            key: self.key,
            payload: PacketPayload::Exception(report),
        })?;
        trace!(
            "[exception] {} sent {:?} for {}",
            self.base.koid(),
            kind,
            task.koid()
        );
        Ok(())
    }

    /// The target is going away or detached this binding from its slot
    ///
    /// Clears the target only; the port stays.
    pub fn on_target_unbind(&self) {
        let _link = self.link.lock();
        let mut state = self.state.lock();
        if state.target.take().is_none() {
            return;
        }
        let port = state.port.clone();
        let unlocked = BindingUnlocked::release(state);
        if let Some(port) = port {
            port.unlink_binding(self, unlocked);
        }
        debug!("[exception] {} target unbound", self.base.koid());
    }

    /// The port's last handle closed
    ///
    /// Drops the port, and detaches from the target if still bound. After
    /// this the binding is inert.
    pub fn on_port_zero_handles(&self) {
        let mut state = self.state.lock();
        let port = state.port.take();
        let target = state.target.take();
        let unlocked = BindingUnlocked::release(state);
        match &port {
            Some(port) => port.unlink_binding(self, unlocked),
            None if target.is_none() => return,
            None => {}
        }
        if let Some(target) = target {
            target.clear_binding(self);
        }
        debug!("[exception] {} port closed, now inert", self.base.koid());
    }
}

impl Dispatcher for ExceptionBinding {
    fn base(&self) -> &dyn ObjectBase {
        &self.base
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::ExceptionBinding
    }

    fn default_rights(&self) -> Rights {
        Rights::BASIC | Rights::MANAGE
    }

    impl_dispatcher_any!();
}

impl fmt::Debug for ExceptionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExceptionBinding")
            .field("koid", &self.base.koid())
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("port", &state.port.as_ref().map(|port| port.koid()))
            .field("target", &state.target.as_ref().map(|target| target.koid()))
            .finish()
    }
}

/// Deliver an exception raised by `thread`
///
/// Candidates are tried in order: the process debugger, the thread's
/// binding, the process binding, then each enclosing job from the innermost
/// outwards. The first binding that accepts the report wins.
///
/// Lifecycle kinds only ever go to debugger slots and are refused here.
///
/// # Errors
/// - `InvalidArgs` if `thread` is not a thread or `kind` is a lifecycle kind
/// - `NotFound` if no binding accepted the report
pub fn dispatch_exception(thread: &Arc<Task>, kind: ExceptionType) -> Result<Koid> {
    if thread.kind() != TaskKind::Thread || kind.is_lifecycle() {
        return Err(KError::InvalidArgs);
    }
    let process = thread.parent();

    let mut candidates = alloc::vec::Vec::new();
    if let Some(process) = &process {
        candidates.extend(process.binding(BindingType::Debugger));
    }
    candidates.extend(thread.binding(BindingType::Thread));
    if let Some(process) = &process {
        candidates.extend(process.binding(BindingType::Process));
    }
    let mut job = process.as_ref().and_then(|process| process.parent());
    while let Some(current) = job {
        candidates.extend(current.binding(BindingType::Job));
        job = current.parent();
    }

    for binding in candidates {
        match binding.send_packet(thread, kind) {
            Ok(()) => return Ok(binding.koid()),
            Err(err) => trace!(
                "[exception] {} declined {:?}: {}",
                binding.koid(),
                kind,
                err
            ),
        }
    }
    warn!("[exception] {:?} on {} not handled", kind, thread.koid());
    Err(KError::NotFound)
}

/// Deliver the synchronous fault saved in `thread`'s trap frame
///
/// The kind is decoded from the frame's syndrome register.
///
/// # Errors
/// As `dispatch_exception`.
pub fn dispatch_fault(thread: &Arc<Task>) -> Result<Koid> {
    let frame = thread.frame();
    let kind = ExceptionType::from_syndrome(frame.esr_el1);
    debug!(
        "[exception] fault on {}: class {:#04x} at {:#x} as {:?}",
        thread.koid(),
        frame.exception_class(),
        frame.elr_el1,
        kind
    );
    dispatch_exception(thread, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::TrapFrame;
    use crate::sync::Deadline;

    fn thread_in_new_process() -> (Arc<Task>, Arc<Task>, Arc<Task>) {
        let job = Task::new_job(None).unwrap();
        let process = Task::new_process(&job).unwrap();
        let thread = Task::new_thread(&process, TrapFrame::new()).unwrap();
        (job, process, thread)
    }

    #[test]
    fn set_target_twice_is_bad_state() {
        let port = Port::new();
        let (_job, process, _thread) = thread_in_new_process();
        let binding = ExceptionBinding::create(BindingType::Process, port.clone(), 1);
        binding.set_target(process.clone()).unwrap();
        assert_eq!(port.binding_count(), 1);
        assert_eq!(binding.set_target(process), Err(KError::BadState));
    }

    #[test]
    fn send_packet_requires_target() {
        let port = Port::new();
        let (_job, _process, thread) = thread_in_new_process();
        let binding = ExceptionBinding::create(BindingType::Thread, port.clone(), 9);
        assert_eq!(
            binding.send_packet(&thread, ExceptionType::General),
            Err(KError::BadState)
        );
        assert!(port.is_empty());
    }

    #[test]
    fn report_carries_registers() {
        let port = Port::new();
        let (_job, process, thread) = thread_in_new_process();
        let mut frame = TrapFrame::new();
        frame.elr_el1 = 0x1000;
        frame.x[0] = 5;
        thread.set_frame(frame);

        let binding = ExceptionBinding::create(BindingType::Thread, port.clone(), 0xabc);
        binding.set_target(thread.clone()).unwrap();
        binding.send_packet(&thread, ExceptionType::SwBreakpoint).unwrap();

        let packet = port.wait(Deadline::now()).unwrap();
        assert_eq!(packet.key, 0xabc);
        match packet.payload {
            PacketPayload::Exception(report) => {
                assert_eq!(report.kind, ExceptionType::SwBreakpoint);
                assert_eq!(report.pid, process.koid());
                assert_eq!(report.tid, thread.koid());
                assert_eq!(report.context.pc, 0x1000);
                assert_eq!(report.context.gprs[0], 5);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn teardown_in_either_order_is_inert() {
        for target_first in [true, false] {
            let port = Port::new();
            let (_job, process, _thread) = thread_in_new_process();
            let binding = ExceptionBinding::create(BindingType::Process, port.clone(), 2);
            process.install_binding(&binding).unwrap();

            if target_first {
                process.kill();
                binding.on_port_zero_handles();
            } else {
                binding.on_port_zero_handles();
                process.kill();
            }
            // Repeated calls change nothing.
            binding.on_target_unbind();
            binding.on_port_zero_handles();

            assert!(binding.is_inert());
            assert_eq!(port.binding_count(), 0);
            assert!(process.binding(BindingType::Process).is_none());
        }
    }

    #[test]
    fn unbound_binding_cannot_rebind_after_port_closes() {
        let port = Port::new();
        let (_job, process, _thread) = thread_in_new_process();
        let binding = ExceptionBinding::create(BindingType::Process, port, 2);
        binding.on_port_zero_handles();
        assert_eq!(binding.set_target(process), Err(KError::BadState));
    }

    #[test]
    fn binding_types_decode() {
        assert_eq!(BindingType::from_raw(2), Ok(BindingType::Debugger));
        assert_eq!(BindingType::from_raw(6), Err(KError::InvalidArgs));
        assert_eq!(BindingType::Debugger.target_kind(), Some(TaskKind::Process));
        assert_eq!(BindingType::None.target_kind(), None);
    }
}
