//! Architecture-independent interrupt management.
//!
//! A registration table maps IRQ numbers to handler callbacks. The
//! per-architecture trap path feeds interrupts in through
//! [`handle_interrupt`] (controller-acknowledged, AArch64/GIC) or
//! [`handle_vectored`] (vector-identified, x86_64/PIC); both dispatch the
//! registered callback and retire the interrupt with an EOI. Handlers run
//! with further interrupts masked and must be short -- anything longer posts
//! to the deferred-work queue, which the scheduler drains before it picks
//! the next task.

use alloc::collections::{BTreeMap, VecDeque};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Architecture-independent IRQ number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IrqNumber(pub u32);

impl IrqNumber {
    pub const fn new(irq: u32) -> Self {
        Self(irq)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IRQ#{}", self.0)
    }
}

/// Handler callback; receives the IRQ that fired.
pub type IrqHandler = fn(IrqNumber);

/// Deferred work posted from interrupt context.
pub type DeferredFn = fn();

const MAX_IRQ: u32 = 256;

struct IrqTable {
    handlers: BTreeMap<u32, IrqHandler>,
    dispatched: u64,
    spurious: u64,
}

impl IrqTable {
    const fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            dispatched: 0,
            spurious: 0,
        }
    }
}

static TABLE: Mutex<IrqTable> = Mutex::new(IrqTable::new());
static DEFERRED: Mutex<VecDeque<DeferredFn>> = Mutex::new(VecDeque::new());

/// Register a handler. One handler per line.
pub fn register_handler(irq: IrqNumber, handler: IrqHandler) -> KernelResult<()> {
    if irq.0 >= MAX_IRQ {
        return Err(KernelError::InvalidArgument {
            what: "IRQ number exceeds maximum",
        });
    }
    let mut table = TABLE.lock();
    if table.handlers.contains_key(&irq.0) {
        return Err(KernelError::AlreadyExists {
            what: "IRQ handler",
        });
    }
    table.handlers.insert(irq.0, handler);
    Ok(())
}

/// Remove the handler for a line.
pub fn unregister_handler(irq: IrqNumber) -> KernelResult<()> {
    let mut table = TABLE.lock();
    if table.handlers.remove(&irq.0).is_none() {
        return Err(KernelError::NotFound {
            what: "IRQ handler",
        });
    }
    Ok(())
}

/// Dispatch to the registered callback; unregistered lines count as
/// spurious and are dropped.
pub fn dispatch(irq: IrqNumber) {
    let handler = {
        let mut table = TABLE.lock();
        let found = table.handlers.get(&irq.0).copied();
        match found {
            Some(_) => table.dispatched += 1,
            None => table.spurious += 1,
        }
        found
        // Lock released before the handler runs.
    };
    if let Some(handler) = handler {
        handler(irq);
    }
}

/// Controller-acknowledged entry: read pending IDs from the interrupt
/// controller until it reports none, dispatching and retiring each.
pub fn handle_interrupt() {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    {
        use crate::arch::aarch64::gic;
        loop {
            let id = gic::acknowledge();
            if id == gic::SPURIOUS_IRQ {
                break;
            }
            dispatch(IrqNumber::new(id));
            gic::end_of_interrupt(id);
        }
    }
}

/// Vector-identified entry: the IDT slot already names the line.
pub fn handle_vectored(irq: IrqNumber) {
    dispatch(irq);
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    crate::arch::x86_64::pic::end_of_interrupt(irq.0);
}

/// Unmask a line at the hardware controller.
pub fn enable(irq: IrqNumber) -> KernelResult<()> {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    return crate::arch::x86_64::pic::enable_irq(irq.0);

    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    return crate::arch::aarch64::gic::enable_irq(irq.0);

    #[cfg(not(target_os = "none"))]
    {
        let _ = irq;
        Ok(())
    }
}

/// Mask a line at the hardware controller.
pub fn disable(irq: IrqNumber) -> KernelResult<()> {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    return crate::arch::x86_64::pic::disable_irq(irq.0);

    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    return crate::arch::aarch64::gic::disable_irq(irq.0);

    #[cfg(not(target_os = "none"))]
    {
        let _ = irq;
        Ok(())
    }
}

/// Set line priority where the controller supports it (GIC); fixed-priority
/// controllers accept and ignore it.
pub fn set_priority(irq: IrqNumber, priority: u8) -> KernelResult<()> {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    return crate::arch::x86_64::pic::set_priority(irq.0, priority);

    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    return crate::arch::aarch64::gic::set_priority(irq.0, priority);

    #[cfg(not(target_os = "none"))]
    {
        let _ = (irq, priority);
        Ok(())
    }
}

/// Post work to run outside interrupt context. Usable from interrupt
/// handlers and normal code alike; the queue lock is held with interrupts
/// masked so a handler can never spin on a lock its own CPU holds.
pub fn defer(work: DeferredFn) {
    crate::arch::without_interrupts(|| DEFERRED.lock().push_back(work));
}

/// Run all deferred work. Called by the scheduler before it picks the next
/// task, never from interrupt context. Work runs with interrupts enabled;
/// only the queue pop is masked.
pub fn drain_deferred() {
    loop {
        let work = crate::arch::without_interrupts(|| DEFERRED.lock().pop_front());
        match work {
            Some(f) => f(),
            None => break,
        }
    }
}

pub fn dispatch_count() -> u64 {
    TABLE.lock().dispatched
}

pub fn spurious_count() -> u64 {
    TABLE.lock().spurious
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    static FIRED: AtomicU32 = AtomicU32::new(0);

    fn test_handler(_irq: IrqNumber) {
        FIRED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn registered_handler_receives_dispatch() {
        let irq = IrqNumber::new(200);
        register_handler(irq, test_handler).unwrap();
        let before = FIRED.load(Ordering::SeqCst);
        dispatch(irq);
        assert_eq!(FIRED.load(Ordering::SeqCst), before + 1);
        unregister_handler(irq).unwrap();
    }

    #[test]
    fn duplicate_registration_fails() {
        let irq = IrqNumber::new(201);
        register_handler(irq, test_handler).unwrap();
        assert!(register_handler(irq, test_handler).is_err());
        unregister_handler(irq).unwrap();
    }

    #[test]
    fn unregistered_dispatch_is_spurious() {
        let before = spurious_count();
        dispatch(IrqNumber::new(222));
        assert_eq!(spurious_count(), before + 1);
    }

    #[test]
    fn out_of_range_registration_fails() {
        assert!(register_handler(IrqNumber::new(4096), test_handler).is_err());
    }

    #[test]
    fn deferred_work_runs_on_drain() {
        static DRAINED: AtomicU32 = AtomicU32::new(0);
        fn work() {
            DRAINED.fetch_add(1, Ordering::SeqCst);
        }
        defer(work);
        defer(work);
        drain_deferred();
        assert_eq!(DRAINED.load(Ordering::SeqCst), 2);
    }
}
