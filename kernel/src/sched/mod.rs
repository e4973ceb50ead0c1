//! Task model and scheduling.
//!
//! Single CPU, cooperative-preemptive: the timer tick preempts when a time
//! slice runs out, and kernel code yields or blocks at explicit points.
//! The module-level functions wrap the global [`Scheduler`] with the
//! interrupt-masking and context-switch choreography.

pub mod scheduler;
pub mod task;

use alloc::{string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

pub use scheduler::Scheduler;
pub use task::{Priority, Task, TaskId, TaskState};

use crate::error::KernelResult;

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);
static NEED_RESCHED: AtomicBool = AtomicBool::new(false);

/// Fallback process context for code running before the scheduler exists
/// (early boot, host tests).
mod fallback {
    use super::*;
    use crate::fs::FdTable;

    lazy_static::lazy_static! {
        pub static ref FD_TABLE: Arc<FdTable> = Arc::new(FdTable::with_stdio());
        pub static ref CWD: Mutex<String> = Mutex::new(String::from("/"));
    }
}

/// Create the scheduler and adopt the boot context as the idle task.
pub fn init() {
    let mut guard = SCHEDULER.lock();
    if guard.is_some() {
        log::warn!("scheduler already initialized");
        return;
    }
    let mut sched = Scheduler::new();
    sched.adopt_bootstrap("idle", Priority::Idle);
    *guard = Some(sched);
    log::info!("scheduler: boot context adopted as idle task");
}

fn with_sched<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
    crate::arch::without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        guard.as_mut().map(f)
    })
}

/// Create a task and enqueue it.
pub fn spawn(
    entry: extern "C" fn(usize),
    arg: usize,
    name: &str,
    priority: Priority,
) -> KernelResult<TaskId> {
    let id = with_sched(|s| {
        let id = s.create(entry as usize, arg, name, priority)?;
        s.start(id)?;
        Ok::<_, crate::error::KernelError>(id)
    })
    .ok_or(crate::error::KernelError::BadState {
        what: "scheduler not initialized",
    })??;
    set_need_resched();
    Ok(id)
}

/// The Running task, if the scheduler is up.
pub fn current() -> Option<Arc<Task>> {
    with_sched(|s| s.current()).flatten()
}

pub fn current_pid() -> TaskId {
    current().map(|t| t.id()).unwrap_or(0)
}

/// The caller's fd table (bootstrap/early contexts use the fallback).
pub fn current_fd_table() -> Arc<crate::fs::FdTable> {
    match current() {
        Some(task) => task.fd_table(),
        None => fallback::FD_TABLE.clone(),
    }
}

/// The caller's working directory.
pub fn current_cwd() -> String {
    match current() {
        Some(task) => task.cwd(),
        None => fallback::CWD.lock().clone(),
    }
}

pub fn set_current_cwd(cwd: String) {
    match current() {
        Some(task) => task.set_cwd(cwd),
        None => *fallback::CWD.lock() = cwd,
    }
}

/// Snapshot of all live tasks, for `ps`.
pub fn all_tasks() -> Vec<Arc<Task>> {
    with_sched(|s| s.snapshot()).unwrap_or_default()
}

pub fn need_resched() -> bool {
    NEED_RESCHED.load(Ordering::Acquire)
}

pub fn set_need_resched() {
    NEED_RESCHED.store(true, Ordering::Release);
}

fn take_need_resched() -> bool {
    NEED_RESCHED.swap(false, Ordering::AcqRel)
}

/// Timer-tick hook: debit the Running task's slice; an exhausted slice
/// posts a reschedule. Runs in interrupt context -- no switching here.
pub fn timer_tick() {
    // Only a try_lock: the tick may interrupt a path that already holds
    // the scheduler lock, and spinning would deadlock the CPU.
    let current = {
        let Some(guard) = SCHEDULER.try_lock() else {
            return;
        };
        guard.as_ref().and_then(|s| s.current())
    };
    if let Some(task) = current {
        if task.debit_time_slice() {
            set_need_resched();
        }
    }
}

/// Voluntarily give up the CPU.
pub fn yield_now() {
    set_need_resched();
    schedule();
}

/// Preemption entry, called on the way out of an interrupt.
pub fn preempt() {
    schedule();
}

/// Pick and switch to the next Ready task, if any. The still-Running
/// current task goes back to its queue; a Blocked or Zombie current does
/// not.
pub fn schedule() {
    // Deferred interrupt work runs first, outside interrupt context and
    // outside the scheduler lock.
    crate::irq::drain_deferred();
    take_need_resched();

    #[cfg(target_os = "none")]
    {
        use crate::arch::context::switch_context;

        crate::arch::without_interrupts(|| {
            let (prev_ptr, next_ptr) = {
                let mut guard = SCHEDULER.lock();
                let Some(sched) = guard.as_mut() else {
                    return;
                };
                let Some(next) = sched.pick_next() else {
                    // Nothing else to run; keep going.
                    return;
                };
                let prev = sched.current().expect("scheduler has no current task");
                if prev.id() == next.id() {
                    return;
                }
                if prev.state() == TaskState::Running {
                    sched.requeue(prev.clone());
                }
                sched.switch_to(next.clone());
                // SAFETY: both pointers stay valid: the Arcs live in the
                // scheduler's task map, and the switch happens with
                // interrupts off.
                unsafe { (prev.context_ptr(), next.context_ptr()) }
            };
            // The lock is released before the switch: the next task may
            // take it immediately.
            // SAFETY: interrupts are masked; prev/next are distinct live
            // contexts.
            unsafe { switch_context(prev_ptr, next_ptr) };
        });
    }
}

/// Block the Running task; something must later [`wake`] it.
pub fn block_current() {
    if let Some(task) = current() {
        task.set_state(TaskState::Blocked);
        schedule();
    }
}

/// Wake a Blocked task.
pub fn wake(id: TaskId) -> KernelResult<()> {
    let result = with_sched(|s| s.wake(id)).ok_or(crate::error::KernelError::BadState {
        what: "scheduler not initialized",
    })?;
    if result.is_ok() {
        set_need_resched();
    }
    result
}

/// Terminate the Running task. Its fd table drops here; stack and TCB go
/// when the reaper releases the last reference.
pub fn exit(code: i32) -> ! {
    if let Some(task) = current() {
        log::debug!("task {} ({}) exit {}", task.id(), task.name(), code);
        task.set_exit_code(code);
        task.set_state(TaskState::Zombie);
        with_sched(|s| s.bury(task));
    }
    loop {
        schedule();
        // Only reachable when the scheduler could not switch away (host
        // builds, or exit before init).
        #[cfg(not(target_os = "none"))]
        panic!("exit({}) with no scheduler to switch away", code);
        #[cfg(target_os = "none")]
        crate::arch::wait_for_interrupt();
    }
}

/// Kill the Running task after a fault. `reason` reaches the console; the
/// exit path is the same as a voluntary exit.
pub fn kill_current(reason: &'static str) {
    if let Some(task) = current() {
        log::error!("task {} ({}) killed: {}", task.id(), task.name(), reason);
        task.set_exit_code(-1);
        task.set_state(TaskState::Zombie);
        with_sched(|s| s.bury(task));
        set_need_resched();
    }
}

/// Free zombie resources. The idle loop calls this.
pub fn reap() -> usize {
    with_sched(|s| s.reap()).unwrap_or(0)
}

/// The idle loop: reap zombies, run anything runnable, sleep until the
/// next interrupt. Never returns.
pub fn run() -> ! {
    loop {
        reap();
        schedule();
        crate::arch::wait_for_interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop_entry(_arg: usize) {}

    #[test]
    fn global_scheduler_spawn_and_inspect() {
        init();
        let id = spawn(noop_entry, 0, "spawned", Priority::Normal).unwrap();
        assert!(id > 0);
        let tasks = all_tasks();
        assert!(tasks.iter().any(|t| t.id() == id && t.name() == "spawned"));
        assert!(need_resched());
    }

    #[test]
    fn fallback_context_before_init() {
        // Whatever the scheduler state, a cwd and fd table always exist.
        let cwd = current_cwd();
        assert!(cwd.starts_with('/'));
        assert!(current_fd_table().open_count() >= 3);
    }

    #[test]
    fn timer_tick_without_tasks_is_harmless() {
        timer_tick();
        timer_tick();
    }
}
