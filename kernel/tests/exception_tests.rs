//! Integration tests for exception bindings
//!
//! Covers:
//! - Delivery order across debugger, thread, process and job bindings
//! - Faults decoded from the saved syndrome
//! - Binding and unbinding through the syscall surface
//! - Lifecycle reports to debuggers
//! - Teardown racing from the task, port and binding sides
//! - Install racing an explicit unbind

use std::sync::{Arc, Barrier};

use kaal_kobject::arch::aarch64::exception::ec;
use kaal_kobject::arch::TrapFrame;
use kaal_kobject::config::PortConfig;
use kaal_kobject::objects::{
    dispatch_exception, dispatch_fault, BindingType, ExceptionBinding, ExceptionType,
    PacketPayload, Port, Task,
};
use kaal_kobject::syscall;
use kaal_kobject::{Deadline, Dispatcher, HandleTable, KError, Rights};

struct Tree {
    root: Arc<Task>,
    job: Arc<Task>,
    process: Arc<Task>,
    thread: Arc<Task>,
}

fn tree() -> Tree {
    let root = Task::new_job(None).expect("Failed to create root job");
    let job = Task::new_job(Some(&root)).expect("Failed to create job");
    let process = Task::new_process(&job).expect("Failed to create process");
    let thread = Task::new_thread(&process, TrapFrame::new()).expect("Failed to create thread");
    Tree {
        root,
        job,
        process,
        thread,
    }
}

fn install(task: &Arc<Task>, port: &Arc<Port>, kind: BindingType, key: u64) -> Arc<ExceptionBinding> {
    let binding = ExceptionBinding::create(kind, port.clone(), key);
    task.install_binding(&binding).expect("Failed to install binding");
    binding
}

fn next_report(port: &Port) -> (u64, ExceptionType) {
    let packet = port.wait(Deadline::now()).expect("No packet queued");
    match packet.payload {
        PacketPayload::Exception(report) => (packet.key, report.kind),
        other => panic!("expected an exception packet, got {:?}", other),
    }
}

/// Test that each candidate is tried in order as bindings are removed
#[test]
fn test_dispatch_order() {
    let t = tree();
    let port = Port::new();
    install(&t.root, &port, BindingType::Job, 1);
    install(&t.job, &port, BindingType::Job, 2);
    install(&t.process, &port, BindingType::Process, 3);
    install(&t.thread, &port, BindingType::Thread, 4);
    install(&t.process, &port, BindingType::Debugger, 5);

    let expected = [
        (BindingType::Debugger, 5),
        (BindingType::Thread, 4),
        (BindingType::Process, 3),
    ];
    for (kind, key) in expected {
        dispatch_exception(&t.thread, ExceptionType::General).expect("Failed to dispatch");
        assert_eq!(next_report(&port), (key, ExceptionType::General));
        let owner = if kind == BindingType::Thread { &t.thread } else { &t.process };
        owner.uninstall_binding(kind).expect("Failed to uninstall");
    }

    // Innermost job first, then its parent.
    dispatch_exception(&t.thread, ExceptionType::General).unwrap();
    assert_eq!(next_report(&port).0, 2);
    t.job.uninstall_binding(BindingType::Job).unwrap();
    dispatch_exception(&t.thread, ExceptionType::General).unwrap();
    assert_eq!(next_report(&port).0, 1);
    t.root.uninstall_binding(BindingType::Job).unwrap();

    assert_eq!(
        dispatch_exception(&t.thread, ExceptionType::General),
        Err(KError::NotFound)
    );
    assert_eq!(port.binding_count(), 0);
}

/// Test that a full port passes the report on to the next candidate
#[test]
fn test_full_port_falls_through() {
    let t = tree();
    let full = Port::with_config(PortConfig { capacity: 1 }).unwrap();
    let fallback = Port::new();
    install(&t.thread, &full, BindingType::Thread, 1);
    install(&t.process, &fallback, BindingType::Process, 2);

    dispatch_exception(&t.thread, ExceptionType::FatalPageFault).unwrap();
    dispatch_exception(&t.thread, ExceptionType::FatalPageFault).unwrap();

    assert_eq!(next_report(&full), (1, ExceptionType::FatalPageFault));
    assert_eq!(next_report(&fallback), (2, ExceptionType::FatalPageFault));
}

/// Test creating, binding and unbinding through handles
#[test]
fn test_bind_unbind_through_syscalls() {
    let t = tree();
    let table = HandleTable::new();
    let port_value = syscall::port_create(&table, PortConfig::default()).unwrap();
    let process_value = table.add_object(t.process.clone()).unwrap();

    assert_eq!(
        syscall::create_exception_binding(&table, BindingType::None, port_value, 0),
        Err(KError::InvalidArgs)
    );
    let binding_value =
        syscall::create_exception_binding(&table, BindingType::Process, port_value, 0x77).unwrap();

    // A thread-level binding cannot go on a process.
    let wrong =
        syscall::create_exception_binding(&table, BindingType::Thread, port_value, 0).unwrap();
    assert_eq!(
        syscall::bind(&table, wrong, process_value),
        Err(KError::InvalidArgs)
    );

    syscall::bind(&table, binding_value, process_value).expect("Failed to bind");
    assert_eq!(
        syscall::bind(&table, binding_value, process_value),
        Err(KError::AlreadyBound)
    );

    dispatch_exception(&t.thread, ExceptionType::UndefinedInstruction).unwrap();
    let packet = syscall::port_wait(&table, port_value, Deadline::now()).unwrap();
    assert_eq!(packet.key, 0x77);
    match packet.payload {
        PacketPayload::Exception(report) => {
            assert_eq!(report.pid, t.process.koid());
            assert_eq!(report.tid, t.thread.koid());
        }
        other => panic!("expected an exception packet, got {:?}", other),
    }

    syscall::unbind(&table, binding_value).expect("Failed to unbind");
    assert_eq!(syscall::unbind(&table, binding_value), Err(KError::BadState));
    assert_eq!(
        dispatch_exception(&t.thread, ExceptionType::UndefinedInstruction),
        Err(KError::NotFound)
    );

    // Unbound bindings can be bound again.
    syscall::bind(&table, binding_value, process_value).expect("Failed to rebind");
    syscall::task_unbind_exception_port(&table, process_value, BindingType::Process).unwrap();
    assert_eq!(
        syscall::task_unbind_exception_port(&table, process_value, BindingType::Process),
        Err(KError::NotFound)
    );
}

/// Test that binding needs MANAGE on both the binding and the task
#[test]
fn test_bind_requires_manage() {
    let t = tree();
    let table = HandleTable::new();
    let port_value = syscall::port_create(&table, PortConfig::default()).unwrap();
    let binding_value =
        syscall::create_exception_binding(&table, BindingType::Process, port_value, 0).unwrap();
    let process_value = table.add_object(t.process.clone()).unwrap();
    let weak_task = syscall::handle_duplicate(&table, process_value, Rights::BASIC).unwrap();
    let weak_binding = syscall::handle_duplicate(&table, binding_value, Rights::BASIC).unwrap();

    assert_eq!(
        syscall::bind(&table, binding_value, weak_task),
        Err(KError::AccessDenied)
    );
    assert_eq!(
        syscall::bind(&table, weak_binding, process_value),
        Err(KError::AccessDenied)
    );
}

/// Test that closing the port handle unbinds and frees the slot
#[test]
fn test_port_close_frees_slot() {
    let t = tree();
    let table = HandleTable::new();
    let port_value = syscall::port_create(&table, PortConfig::default()).unwrap();
    let process_value = table.add_object(t.process.clone()).unwrap();
    syscall::task_bind_exception_port(&table, process_value, port_value, 3, BindingType::Process)
        .expect("Failed to bind");
    let binding = t.process.binding(BindingType::Process).expect("binding missing");

    syscall::handle_close(&table, port_value).unwrap();

    assert!(binding.is_inert());
    assert!(t.process.binding(BindingType::Process).is_none());
    assert_eq!(
        dispatch_exception(&t.thread, ExceptionType::General),
        Err(KError::NotFound)
    );

    // The slot is free for a new port.
    let port = Port::new();
    install(&t.process, &port, BindingType::Process, 4);
}

/// Test lifecycle reports to process and job debuggers
#[test]
fn test_debugger_lifecycle_reports() {
    let t = tree();
    let port = Port::new();
    install(&t.job, &port, BindingType::JobDebugger, 10);
    install(&t.process, &port, BindingType::Debugger, 20);

    t.process.start().unwrap();
    assert_eq!(next_report(&port), (10, ExceptionType::ProcessStarting));

    t.thread.start().unwrap();
    assert_eq!(next_report(&port), (20, ExceptionType::ThreadStarting));
    assert_eq!(t.thread.start(), Err(KError::BadState));

    t.thread.kill();
    assert_eq!(next_report(&port), (20, ExceptionType::ThreadExiting));
    t.thread.kill();
    assert!(port.is_empty());
    assert_eq!(t.job.start(), Err(KError::NotSupported));
}

/// Test that killing a target releases its bindings
#[test]
fn test_kill_releases_bindings() {
    let t = tree();
    let port = Port::new();
    let binding = install(&t.process, &port, BindingType::Process, 1);

    t.process.kill();

    assert!(!binding.is_bound());
    assert_eq!(port.binding_count(), 0);
    assert_eq!(
        t.process.install_binding(&ExceptionBinding::create(BindingType::Process, port.clone(), 2)),
        Err(KError::BadState)
    );
    assert!(Task::new_thread(&t.process, TrapFrame::new()).is_err());
}

/// Test that racing teardown from every side leaves nothing behind
#[test]
fn test_concurrent_teardown() {
    for _ in 0..64 {
        let t = tree();
        let table = HandleTable::new();
        let port_value = syscall::port_create(&table, PortConfig::default()).unwrap();
        let port = table.get::<Port>(port_value, Rights::READ).unwrap();
        let binding = install(&t.process, &port, BindingType::Process, 1);

        crossbeam::scope(|s| {
            s.spawn(|_| t.process.kill());
            s.spawn(|_| {
                let _ = binding.unbind();
            });
            s.spawn(|_| {
                syscall::handle_close(&table, port_value).unwrap();
            });
        })
        .expect("scope failed");

        assert!(!binding.is_bound());
        assert_eq!(port.binding_count(), 0);
        assert!(t.process.binding(BindingType::Process).is_none());
        assert!(t.process.is_terminated());
    }
}

/// Test that concurrent installs on one slot admit exactly one binding
#[test]
fn test_concurrent_install_single_winner() {
    let t = tree();
    let port = Port::new();
    let bindings: Vec<_> = (0..8)
        .map(|key| ExceptionBinding::create(BindingType::Thread, port.clone(), key))
        .collect();

    let results = crossbeam::scope(|s| {
        let joins: Vec<_> = bindings
            .iter()
            .map(|binding| s.spawn(|_| t.thread.install_binding(binding)))
            .collect();
        joins
            .into_iter()
            .map(|j| j.join().expect("installer panicked"))
            .collect::<Vec<_>>()
    })
    .expect("scope failed");

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.err())
        .all(|e| e == KError::AlreadyBound));
    assert_eq!(port.binding_count(), 1);
}

/// Test that an unbind racing an install never leaves the port linked to an
/// unbound binding
#[test]
fn test_install_racing_unbind_keeps_port_in_step() {
    for _ in 0..256 {
        let t = tree();
        let port = Port::new();
        let binding = ExceptionBinding::create(BindingType::Process, port.clone(), 1);
        let start = Barrier::new(2);

        crossbeam::scope(|s| {
            s.spawn(|_| {
                start.wait();
                let _ = t.process.install_binding(&binding);
            });
            s.spawn(|_| {
                start.wait();
                let _ = binding.unbind();
            });
        })
        .expect("scope failed");

        let bound = binding.is_bound();
        assert_eq!(port.binding_count(), bound as usize);
        assert_eq!(t.process.binding(BindingType::Process).is_some(), bound);

        // Whatever the outcome, a later unbind leaves nothing behind.
        let _ = binding.unbind();
        assert_eq!(port.binding_count(), 0);
        assert!(t.process.binding(BindingType::Process).is_none());
    }
}

/// Test that a fault is reported with the kind decoded from the thread's frame
#[test]
fn test_fault_dispatch_classifies_saved_syndrome() {
    let t = tree();
    let port = Port::new();
    install(&t.thread, &port, BindingType::Thread, 7);

    let cases = [
        ((ec::BRK64 as u64) << 26, ExceptionType::SwBreakpoint),
        (((ec::DATA_ABORT_LOWER as u64) << 26) | 0x21, ExceptionType::UnalignedAccess),
        ((ec::INSTRUCTION_ABORT_LOWER as u64) << 26, ExceptionType::FatalPageFault),
        ((ec::UNKNOWN as u64) << 26, ExceptionType::UndefinedInstruction),
    ];
    for (esr, kind) in cases {
        let mut frame = TrapFrame::new();
        frame.esr_el1 = esr;
        frame.elr_el1 = 0x40_2000;
        t.thread.set_frame(frame);

        dispatch_fault(&t.thread).expect("Failed to dispatch fault");
        let packet = port.wait(Deadline::now()).expect("No packet queued");
        match packet.payload {
            PacketPayload::Exception(report) => {
                assert_eq!(report.kind, kind);
                assert_eq!(report.context.esr, esr);
                assert_eq!(report.context.pc, 0x40_2000);
            }
            other => panic!("expected an exception packet, got {:?}", other),
        }
    }
}

/// Test that lifecycle kinds cannot be raised as exceptions
#[test]
fn test_lifecycle_kinds_are_not_dispatched() {
    let t = tree();
    let port = Port::new();
    install(&t.thread, &port, BindingType::Thread, 1);

    for kind in [
        ExceptionType::ThreadStarting,
        ExceptionType::ThreadExiting,
        ExceptionType::ProcessStarting,
    ] {
        assert_eq!(dispatch_exception(&t.thread, kind), Err(KError::InvalidArgs));
    }
    assert!(port.is_empty());
    dispatch_exception(&t.thread, ExceptionType::PolicyError).expect("Failed to dispatch");
    assert_eq!(next_report(&port), (1, ExceptionType::PolicyError));
}
