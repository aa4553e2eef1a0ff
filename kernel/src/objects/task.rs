//! Tasks - jobs, processes and threads
//!
//! Tasks are the targets of exception bindings. A job contains processes
//! and child jobs, a process contains threads, and each thread carries the
//! saved register state that goes into its exception reports.
//!
//! ## Signals
//!
//! - `RUNNING`: set by `start`, cleared by `kill`
//! - `TERMINATED`: set by `kill`
//!
//! ## Exception Slots
//!
//! Every task has an exception slot and a debugger slot. Thread tasks only
//! use the exception slot. Bindings are installed with `install_binding`,
//! which checks that the binding type matches the task kind.
//!
//! ## Lifecycle
//!
//! ```text
//! Created → Running → Terminated
//!    └──────────────────↑
//! ```

use alloc::sync::Arc;
use core::fmt;

use log::{debug, warn};
use spin::Mutex;

use super::dispatcher::{impl_dispatcher_any, Dispatcher, ObjectType};
use super::exception::{BindingType, ExceptionBinding, ExceptionType};
use super::handle::Rights;
use super::kobject::{KernelObject, ObjectBase};
use super::signals::Signals;
use crate::arch::TrapFrame;
use crate::error::{KError, Result};

/// Kind of task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Job,
    Process,
    Thread,
}

impl TaskKind {
    fn object_type(self) -> ObjectType {
        match self {
            TaskKind::Job => ObjectType::Job,
            TaskKind::Process => ObjectType::Process,
            TaskKind::Thread => ObjectType::Thread,
        }
    }
}

struct TaskState {
    /// Saved registers (threads only)
    frame: TrapFrame,
    started: bool,
    terminated: bool,
    exception: Option<Arc<ExceptionBinding>>,
    debugger: Option<Arc<ExceptionBinding>>,
}

impl TaskState {
    fn slot_mut(&mut self, kind: BindingType) -> &mut Option<Arc<ExceptionBinding>> {
        if kind.is_debugger() {
            &mut self.debugger
        } else {
            &mut self.exception
        }
    }
}

/// Job, process or thread
pub struct Task {
    base: KernelObject,
    kind: TaskKind,
    parent: Option<Arc<Task>>,
    state: Mutex<TaskState>,
}

impl Task {
    fn create(kind: TaskKind, parent: Option<Arc<Task>>, frame: TrapFrame) -> Arc<Self> {
        let task = Arc::new(Self {
            base: KernelObject::with_signals(Signals::empty()),
            kind,
            parent,
            state: Mutex::new(TaskState {
                frame,
                started: false,
                terminated: false,
                exception: None,
                debugger: None,
            }),
        });
        debug!(
            "[task] created {:?} {} (parent {:?})",
            kind,
            task.koid(),
            task.parent.as_ref().map(|parent| parent.koid())
        );
        task
    }

    fn require_parent(parent: &Arc<Task>, kind: TaskKind) -> Result<()> {
        if parent.kind != kind {
            return Err(KError::WrongType);
        }
        if parent.is_terminated() {
            return Err(KError::BadState);
        }
        Ok(())
    }

    /// Create a job, optionally nested in `parent`
    ///
    /// # Errors
    /// `WrongType` if `parent` is not a job, `BadState` if it has terminated.
    pub fn new_job(parent: Option<&Arc<Task>>) -> Result<Arc<Self>> {
        if let Some(parent) = parent {
            Self::require_parent(parent, TaskKind::Job)?;
        }
        Ok(Self::create(TaskKind::Job, parent.cloned(), TrapFrame::new()))
    }

    /// Create a process in `job`
    pub fn new_process(job: &Arc<Task>) -> Result<Arc<Self>> {
        Self::require_parent(job, TaskKind::Job)?;
        Ok(Self::create(TaskKind::Process, Some(job.clone()), TrapFrame::new()))
    }

    /// Create a thread in `process` with an initial register state
    pub fn new_thread(process: &Arc<Task>, frame: TrapFrame) -> Result<Arc<Self>> {
        Self::require_parent(process, TaskKind::Process)?;
        Ok(Self::create(TaskKind::Thread, Some(process.clone()), frame))
    }

    #[inline]
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Enclosing job or process
    pub fn parent(&self) -> Option<Arc<Task>> {
        self.parent.clone()
    }

    /// Saved register state
    pub fn frame(&self) -> TrapFrame {
        self.state.lock().frame
    }

    /// Replace the saved register state
    pub fn set_frame(&self, frame: TrapFrame) {
        self.state.lock().frame = frame;
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Binding installed for `kind`, if any
    pub fn binding(&self, kind: BindingType) -> Option<Arc<ExceptionBinding>> {
        let mut state = self.state.lock();
        state
            .slot_mut(kind)
            .as_ref()
            .filter(|binding| binding.kind() == kind)
            .cloned()
    }

    /// Bind `binding` to this task and install it in the matching slot
    ///
    /// # Errors
    /// - `InvalidArgs` if the binding type does not fit this task kind
    /// - `AlreadyBound` if the slot is occupied
    /// - `BadState` if the task has terminated or the binding is already bound
    pub fn install_binding(self: &Arc<Self>, binding: &Arc<ExceptionBinding>) -> Result<()> {
        if binding.kind().target_kind() != Some(self.kind) {
            return Err(KError::InvalidArgs);
        }
        {
            let mut state = self.state.lock();
            if state.terminated {
                return Err(KError::BadState);
            }
            if state.slot_mut(binding.kind()).is_some() {
                return Err(KError::AlreadyBound);
            }
        }

        binding.set_target(self.clone())?;

        let rejected = {
            let mut state = self.state.lock();
            if state.terminated {
                Some(KError::BadState)
            } else {
                let slot = state.slot_mut(binding.kind());
                if slot.is_some() {
                    Some(KError::AlreadyBound)
                } else {
                    *slot = Some(binding.clone());
                    None
                }
            }
        };
        if let Some(err) = rejected {
            binding.on_target_unbind();
            return Err(err);
        }
        // The port may have closed while the slot was empty; its teardown
        // could not find us then, so undo the install here.
        if !binding.is_bound() {
            self.clear_binding(binding);
            return Err(KError::BadState);
        }
        Ok(())
    }

    /// Remove the binding installed for `kind` and unbind it
    ///
    /// # Errors
    /// `NotFound` if no such binding is installed.
    pub fn uninstall_binding(&self, kind: BindingType) -> Result<()> {
        let binding = self.binding(kind).ok_or(KError::NotFound)?;
        binding.unbind()
    }

    /// Empty whichever slot holds `binding`
    pub(crate) fn clear_binding(&self, binding: &ExceptionBinding) {
        let removed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut removed = None;
            for slot in [&mut state.exception, &mut state.debugger] {
                if slot
                    .as_ref()
                    .is_some_and(|installed| core::ptr::eq(Arc::as_ptr(installed), binding))
                {
                    removed = slot.take();
                }
            }
            removed
        };
        drop(removed);
    }

    /// Report `kind` to the debugger slot of `owner`, if one is installed
    fn notify_debugger(&self, owner: Option<&Arc<Task>>, slot: BindingType, kind: ExceptionType) {
        let Some(binding) = owner.and_then(|owner| owner.binding(slot)) else {
            return;
        };
        if let Err(err) = binding.send_packet(self, kind) {
            warn!("[task] {:?} for {} not delivered: {}", kind, self.koid(), err);
        }
    }

    /// Start running
    ///
    /// Threads report `ThreadStarting` to their process debugger; processes
    /// report `ProcessStarting` to their job debugger.
    ///
    /// # Errors
    /// - `NotSupported` for jobs
    /// - `BadState` if already started or terminated
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.kind == TaskKind::Job {
            return Err(KError::NotSupported);
        }
        {
            let mut state = self.state.lock();
            if state.started || state.terminated {
                return Err(KError::BadState);
            }
            state.started = true;
        }
        self.base.update_state(Signals::empty(), Signals::RUNNING);
        match self.kind {
            TaskKind::Thread => self.notify_debugger(
                self.parent.as_ref(),
                BindingType::Debugger,
                ExceptionType::ThreadStarting,
            ),
            TaskKind::Process => self.notify_debugger(
                self.parent.as_ref(),
                BindingType::JobDebugger,
                ExceptionType::ProcessStarting,
            ),
            TaskKind::Job => {}
        }
        debug!("[task] {} started", self.koid());
        Ok(())
    }

    /// Terminate
    ///
    /// Killing a terminated task does nothing. Installed bindings are
    /// released after `TERMINATED` is asserted.
    pub fn kill(self: &Arc<Self>) {
        let (was_started, released) = {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            (
                state.started,
                [state.exception.take(), state.debugger.take()],
            )
        };
        if self.kind == TaskKind::Thread && was_started {
            self.notify_debugger(
                self.parent.as_ref(),
                BindingType::Debugger,
                ExceptionType::ThreadExiting,
            );
        }
        self.base
            .update_state(Signals::RUNNING, Signals::TERMINATED);
        for binding in released.into_iter().flatten() {
            binding.on_target_unbind();
        }
        debug!("[task] {} terminated", self.koid());
    }
}

impl Dispatcher for Task {
    fn base(&self) -> &dyn ObjectBase {
        &self.base
    }

    fn object_type(&self) -> ObjectType {
        self.kind.object_type()
    }

    fn default_rights(&self) -> Rights {
        Rights::DEFAULT | Rights::MANAGE
    }

    impl_dispatcher_any!();
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("koid", &self.koid())
            .field("kind", &self.kind)
            .field("signals", &self.base.signals())
            .finish()
    }
}
