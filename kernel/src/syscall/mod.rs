//! System call interface
//!
//! The functions here are the syscall surface of the object core. Each one
//! works on the caller's `HandleTable`, checks rights, and returns its
//! outcome explicitly. `handle_syscall` decodes a trap frame into one of
//! them: the syscall number is in x8, arguments are in x0-x5, the status
//! goes back in x0 and scalar results in x1 onwards.
//!
//! Deadlines cross the trap boundary as nanoseconds relative to the call,
//! with `u64::MAX` meaning "wait forever".

pub mod numbers;
pub mod wait;

use log::{debug, warn};

use crate::arch::TrapFrame;
use crate::config::PortConfig;
use crate::error::{KError, Result};
use crate::objects::{
    wait_async, BindingType, Dispatcher, ExceptionBinding, ExceptionType, HandleTable,
    HandleValue, Notification, PacketPayload, Port, PortPacket, Rights, SecureMonitorChannel,
    Signals, SmcArgs, SmcOptions, SmcRegistry, Task,
};
use crate::sync::Deadline;

pub use wait::{wait_many, wait_one, WaitItem};

/// Close a handle
pub fn handle_close(table: &HandleTable, value: HandleValue) -> Result<()> {
    table.close(value)
}

/// Duplicate a handle with the same or fewer rights
pub fn handle_duplicate(table: &HandleTable, value: HandleValue, rights: Rights) -> Result<HandleValue> {
    table.duplicate(value, rights)
}

/// Create a notification
pub fn notification_create(table: &HandleTable) -> Result<HandleValue> {
    table.add_object(Notification::new())
}

/// Clear then set user signals on a notification
pub fn object_signal(table: &HandleTable, value: HandleValue, clear: Signals, set: Signals) -> Result<()> {
    table
        .get::<Notification>(value, Rights::SIGNAL)?
        .signal(clear, set)
}

/// Arm a one-shot asynchronous wait delivering to `port_value`
pub fn object_wait_async(
    table: &HandleTable,
    value: HandleValue,
    port_value: HandleValue,
    key: u64,
    signals: Signals,
) -> Result<()> {
    let port = table.get::<Port>(port_value, Rights::WRITE)?;
    table.with_handle(value, |handle| {
        handle.check_rights(Rights::WAIT)?;
        wait_async(handle, &port, key, signals)
    })?
}

/// Create a port
pub fn port_create(table: &HandleTable, config: PortConfig) -> Result<HandleValue> {
    table.add_object(Port::with_config(config)?)
}

/// Queue a user packet
pub fn port_queue(table: &HandleTable, port_value: HandleValue, key: u64, data: [u64; 4]) -> Result<()> {
    table
        .get::<Port>(port_value, Rights::WRITE)?
        .queue(PortPacket::user(key, data))
}

/// Dequeue the next packet
pub fn port_wait(table: &HandleTable, port_value: HandleValue, deadline: Deadline) -> Result<PortPacket> {
    // Blocks on our own reference; closing the handle meanwhile does not wake us.
    table.get::<Port>(port_value, Rights::READ)?.wait(deadline)
}

/// Cancel the async waits on `value` that deliver to `port_value` with `key`
///
/// # Errors
/// `NotFound` if no such wait was armed.
pub fn port_cancel(table: &HandleTable, port_value: HandleValue, value: HandleValue, key: u64) -> Result<()> {
    let port = table.get::<Port>(port_value, Rights::WRITE)?;
    let canceled = table.with_handle(value, |handle| {
        handle
            .object()
            .base()
            .cancel_by_key(handle.id(), port.koid(), key)
    })?;
    if canceled {
        Ok(())
    } else {
        Err(KError::NotFound)
    }
}

/// Create an unbound exception binding delivering to `port_value`
///
/// # Errors
/// `InvalidArgs` for `BindingType::None`.
pub fn create_exception_binding(
    table: &HandleTable,
    kind: BindingType,
    port_value: HandleValue,
    key: u64,
) -> Result<HandleValue> {
    if kind == BindingType::None {
        return Err(KError::InvalidArgs);
    }
    let port = table.get::<Port>(port_value, Rights::READ)?;
    table.add_object(ExceptionBinding::create(kind, port, key))
}

/// Bind an exception binding to a task
pub fn bind(table: &HandleTable, binding_value: HandleValue, task_value: HandleValue) -> Result<()> {
    let binding = table.get::<ExceptionBinding>(binding_value, Rights::MANAGE)?;
    let task = table.get::<Task>(task_value, Rights::MANAGE)?;
    task.install_binding(&binding)
}

/// Unbind an exception binding from its task
pub fn unbind(table: &HandleTable, binding_value: HandleValue) -> Result<()> {
    table
        .get::<ExceptionBinding>(binding_value, Rights::MANAGE)?
        .unbind()
}

/// Create a binding for `port_value` and install it on a task in one step
pub fn task_bind_exception_port(
    table: &HandleTable,
    task_value: HandleValue,
    port_value: HandleValue,
    key: u64,
    kind: BindingType,
) -> Result<()> {
    let task = table.get::<Task>(task_value, Rights::MANAGE)?;
    let port = table.get::<Port>(port_value, Rights::READ)?;
    task.install_binding(&ExceptionBinding::create(kind, port, key))
}

/// Remove the binding of type `kind` from a task
pub fn task_unbind_exception_port(table: &HandleTable, task_value: HandleValue, kind: BindingType) -> Result<()> {
    table
        .get::<Task>(task_value, Rights::MANAGE)?
        .uninstall_binding(kind)
}

/// Open the system-wide SMC channel, creating it on first use
pub fn smc_create(table: &HandleTable, options: SmcOptions) -> Result<HandleValue> {
    smc_create_in(SmcRegistry::global(), table, options)
}

/// Open the SMC channel of a specific registry
pub fn smc_create_in(registry: &SmcRegistry, table: &HandleTable, options: SmcOptions) -> Result<HandleValue> {
    table.add_object(registry.create(options))
}

/// Block for the next SMC request and claim it
pub fn smc_wait_for_request(table: &HandleTable, value: HandleValue) -> Result<SmcArgs> {
    table
        .get::<SecureMonitorChannel>(value, Rights::READ)?
        .wait_for_request()
}

/// Answer the claimed SMC request
pub fn smc_set_result(table: &HandleTable, value: HandleValue, result: i64) -> Result<()> {
    table
        .get::<SecureMonitorChannel>(value, Rights::WRITE)?
        .set_result(result)
}

fn handle_arg(raw: u64) -> Result<HandleValue> {
    HandleValue::try_from(raw).map_err(|_| KError::BadHandle)
}

fn signals_arg(raw: u64) -> Result<Signals> {
    u32::try_from(raw)
        .map(Signals::from_bits_retain)
        .map_err(|_| KError::InvalidArgs)
}

fn exception_code(kind: ExceptionType) -> u64 {
    match kind {
        ExceptionType::General => 0,
        ExceptionType::FatalPageFault => 1,
        ExceptionType::UndefinedInstruction => 2,
        ExceptionType::SwBreakpoint => 3,
        ExceptionType::HwBreakpoint => 4,
        ExceptionType::UnalignedAccess => 5,
        ExceptionType::ThreadStarting => 6,
        ExceptionType::ThreadExiting => 7,
        ExceptionType::PolicyError => 8,
        ExceptionType::ProcessStarting => 9,
    }
}

/// Packet type tags written to x2 by `SYS_PORT_WAIT`
pub const PACKET_TYPE_USER: u64 = 0;
pub const PACKET_TYPE_SIGNAL: u64 = 1;
pub const PACKET_TYPE_EXCEPTION: u64 = 2;

/// Flatten a packet into key, type tag and four payload words
fn packet_words(packet: &PortPacket) -> [u64; 6] {
    match packet.payload {
        PacketPayload::User(data) => [
            packet.key,
            PACKET_TYPE_USER,
            data[0],
            data[1],
            data[2],
            data[3],
        ],
        PacketPayload::Signal { trigger, observed } => [
            packet.key,
            PACKET_TYPE_SIGNAL,
            trigger.bits() as u64,
            observed.bits() as u64,
            0,
            0,
        ],
        PacketPayload::Exception(report) => [
            packet.key,
            PACKET_TYPE_EXCEPTION,
            exception_code(report.kind),
            report.pid.raw(),
            report.tid.raw(),
            report.context.pc,
        ],
    }
}

/// Pack SMC identifiers into one register: func_id | client_id << 32 | secure_os_id << 48
fn smc_words(args: &SmcArgs) -> [u64; 7] {
    let ids = (args.func_id as u64) | ((args.client_id as u64) << 32) | ((args.secure_os_id as u64) << 48);
    let p = args.params;
    [ids, p[0], p[1], p[2], p[3], p[4], p[5]]
}

fn dispatch(table: &HandleTable, number: u64, args: [u64; 6], frame: &mut TrapFrame) -> Result<()> {
    match number {
        numbers::SYS_HANDLE_CLOSE => handle_close(table, handle_arg(args[0])?),
        numbers::SYS_HANDLE_DUPLICATE => {
            let rights = u32::try_from(args[1])
                .ok()
                .and_then(Rights::from_bits)
                .ok_or(KError::InvalidArgs)?;
            let value = handle_duplicate(table, handle_arg(args[0])?, rights)?;
            frame.set_results(&[value as u64]);
            Ok(())
        }
        numbers::SYS_NOTIFICATION_CREATE => {
            let value = notification_create(table)?;
            frame.set_results(&[value as u64]);
            Ok(())
        }
        numbers::SYS_OBJECT_SIGNAL => object_signal(
            table,
            handle_arg(args[0])?,
            signals_arg(args[1])?,
            signals_arg(args[2])?,
        ),
        numbers::SYS_OBJECT_WAIT_ONE => {
            let outcome = wait_one(
                table,
                handle_arg(args[0])?,
                signals_arg(args[1])?,
                Deadline::from_nanos(args[2]),
            );
            frame.set_results(&[outcome.observed.bits() as u64]);
            outcome.status
        }
        numbers::SYS_OBJECT_WAIT_ASYNC => object_wait_async(
            table,
            handle_arg(args[0])?,
            handle_arg(args[1])?,
            args[2],
            signals_arg(args[3])?,
        ),
        numbers::SYS_PORT_CREATE => {
            let config = match args[0] {
                0 => PortConfig::default(),
                capacity => PortConfig {
                    capacity: usize::try_from(capacity).map_err(|_| KError::InvalidArgs)?,
                },
            };
            let value = port_create(table, config)?;
            frame.set_results(&[value as u64]);
            Ok(())
        }
        numbers::SYS_PORT_QUEUE => port_queue(
            table,
            handle_arg(args[0])?,
            args[1],
            [args[2], args[3], args[4], args[5]],
        ),
        numbers::SYS_PORT_WAIT => {
            let packet = port_wait(table, handle_arg(args[0])?, Deadline::from_nanos(args[1]))?;
            frame.set_results(&packet_words(&packet));
            Ok(())
        }
        numbers::SYS_PORT_CANCEL => port_cancel(
            table,
            handle_arg(args[0])?,
            handle_arg(args[1])?,
            args[2],
        ),
        numbers::SYS_EXCEPTION_BINDING_CREATE => {
            let value = create_exception_binding(
                table,
                BindingType::from_raw(args[0])?,
                handle_arg(args[1])?,
                args[2],
            )?;
            frame.set_results(&[value as u64]);
            Ok(())
        }
        numbers::SYS_EXCEPTION_BIND => bind(table, handle_arg(args[0])?, handle_arg(args[1])?),
        numbers::SYS_EXCEPTION_UNBIND => unbind(table, handle_arg(args[0])?),
        numbers::SYS_TASK_BIND_EXCEPTION_PORT => task_bind_exception_port(
            table,
            handle_arg(args[0])?,
            handle_arg(args[1])?,
            args[2],
            BindingType::from_raw(args[3])?,
        ),
        numbers::SYS_TASK_UNBIND_EXCEPTION_PORT => task_unbind_exception_port(
            table,
            handle_arg(args[0])?,
            BindingType::from_raw(args[1])?,
        ),
        numbers::SYS_SMC_CREATE => {
            let value = smc_create(table, SmcOptions::default())?;
            frame.set_results(&[value as u64]);
            Ok(())
        }
        numbers::SYS_SMC_WAIT_FOR_REQUEST => {
            let request = smc_wait_for_request(table, handle_arg(args[0])?)?;
            frame.set_results(&smc_words(&request));
            Ok(())
        }
        numbers::SYS_SMC_SET_RESULT => smc_set_result(table, handle_arg(args[0])?, args[1] as i64),
        _ => {
            warn!("[syscall] Unknown syscall number: {:#x}", number);
            Err(KError::NotSupported)
        }
    }
}

/// Syscall dispatcher
///
/// Decodes the syscall from `frame`, runs it against `table`, and writes the
/// status (0 or a negative `KError` code) to x0.
pub fn handle_syscall(table: &HandleTable, frame: &mut TrapFrame) {
    let number = frame.syscall_number();
    let args = frame.syscall_args();
    let result = dispatch(table, number, args, frame);
    if let Err(err) = result {
        debug!("[syscall] {:#x} failed: {}", number, err);
    }
    frame.set_status(crate::error::status_of(&result));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Handle;

    fn call(table: &HandleTable, number: u64, args: &[u64]) -> TrapFrame {
        let mut frame = TrapFrame::new();
        frame.x[8] = number;
        frame.x[..args.len()].copy_from_slice(args);
        handle_syscall(table, &mut frame);
        frame
    }

    #[test]
    fn unknown_number_is_not_supported() {
        let table = HandleTable::new();
        let frame = call(&table, 0xdead, &[]);
        assert_eq!(frame.x[0] as i64, KError::NotSupported.status());
    }

    #[test]
    fn notification_signal_and_wait_through_trap_frames() {
        let table = HandleTable::new();
        let frame = call(&table, numbers::SYS_NOTIFICATION_CREATE, &[]);
        assert_eq!(frame.x[0], 0);
        let value = frame.x[1];

        let set = Signals::USER_3.bits() as u64;
        assert_eq!(call(&table, numbers::SYS_OBJECT_SIGNAL, &[value, 0, set]).x[0], 0);

        let frame = call(&table, numbers::SYS_OBJECT_WAIT_ONE, &[value, set, u64::MAX]);
        assert_eq!(frame.x[0], 0);
        assert_eq!(frame.x[1], set);

        let frame = call(&table, numbers::SYS_OBJECT_WAIT_ONE, &[value, Signals::USER_0.bits() as u64, 0]);
        assert_eq!(frame.x[0] as i64, KError::TimedOut.status());
        assert_eq!(frame.x[1], set);
    }

    #[test]
    fn port_round_trip_through_trap_frames() {
        let table = HandleTable::new();
        let port = call(&table, numbers::SYS_PORT_CREATE, &[4]).x[1];
        assert_eq!(call(&table, numbers::SYS_PORT_QUEUE, &[port, 9, 1, 2, 3, 4]).x[0], 0);
        let frame = call(&table, numbers::SYS_PORT_WAIT, &[port, 0]);
        assert_eq!(frame.x[0], 0);
        assert_eq!(&frame.x[1..7], &[9, PACKET_TYPE_USER, 1, 2, 3, 4]);
    }

    #[test]
    fn async_wait_and_cancel() {
        let table = HandleTable::new();
        let port = port_create(&table, PortConfig::default()).unwrap();
        let value = notification_create(&table).unwrap();
        object_wait_async(&table, value, port, 5, Signals::USER_0).unwrap();
        port_cancel(&table, port, value, 5).unwrap();
        assert_eq!(port_cancel(&table, port, value, 5), Err(KError::NotFound));
        object_signal(&table, value, Signals::empty(), Signals::USER_0).unwrap();
        assert_eq!(port_wait(&table, port, Deadline::now()), Err(KError::TimedOut));
    }

    #[test]
    fn async_wait_between_ports_is_not_supported() {
        let table = HandleTable::new();
        let a = port_create(&table, PortConfig::default()).unwrap();
        let b = port_create(&table, PortConfig::default()).unwrap();
        let readable = Signals::READABLE.bits() as u64;
        let frame = call(&table, numbers::SYS_OBJECT_WAIT_ASYNC, &[a as u64, b as u64, 1, readable]);
        assert_eq!(frame.x[0] as i64, KError::NotSupported.status());
        assert_eq!(
            object_wait_async(&table, b, a, 2, Signals::READABLE),
            Err(KError::NotSupported)
        );
        port_queue(&table, a, 9, [0; 4]).unwrap();
        assert_eq!(port_wait(&table, a, Deadline::now()).unwrap().key, 9);
        assert_eq!(port_wait(&table, b, Deadline::now()), Err(KError::TimedOut));
    }

    #[test]
    fn signal_requires_notification_and_right() {
        let table = HandleTable::new();
        let port = port_create(&table, PortConfig::default()).unwrap();
        assert_eq!(
            object_signal(&table, port, Signals::empty(), Signals::USER_0),
            Err(KError::WrongType)
        );
        let read_only = table
            .add(Handle::new(Notification::new(), Rights::READ | Rights::WAIT))
            .unwrap();
        assert_eq!(
            object_signal(&table, read_only, Signals::empty(), Signals::USER_0),
            Err(KError::AccessDenied)
        );
    }

    #[test]
    fn binding_needs_real_type() {
        let table = HandleTable::new();
        let port = port_create(&table, PortConfig::default()).unwrap();
        assert_eq!(
            create_exception_binding(&table, BindingType::None, port, 0),
            Err(KError::InvalidArgs)
        );
        let frame = call(&table, numbers::SYS_EXCEPTION_BINDING_CREATE, &[42, port as u64, 0]);
        assert_eq!(frame.x[0] as i64, KError::InvalidArgs.status());
    }

    #[test]
    fn smc_request_words_are_packed() {
        let args = SmcArgs {
            func_id: 0x8400_0001,
            params: [1, 2, 3, 4, 5, 6],
            client_id: 3,
            secure_os_id: 2,
        };
        let words = smc_words(&args);
        assert_eq!(words[0], 0x8400_0001 | (3 << 32) | (2 << 48));
        assert_eq!(&words[1..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn duplicate_through_trap_frame() {
        let table = HandleTable::new();
        let value = notification_create(&table).unwrap();
        let frame = call(
            &table,
            numbers::SYS_HANDLE_DUPLICATE,
            &[value as u64, Rights::WAIT.bits() as u64],
        );
        assert_eq!(frame.x[0], 0);
        let copy = frame.x[1] as HandleValue;
        assert_ne!(copy, value);
        assert_eq!(
            handle_duplicate(&table, copy, Rights::WAIT),
            Err(KError::AccessDenied)
        );
    }
}
