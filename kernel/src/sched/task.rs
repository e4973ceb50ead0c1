//! Task control block and kernel stacks.

use alloc::{string::String, sync::Arc};
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering},
};

use spin::Mutex;

use crate::{
    arch::context::Context,
    config,
    error::{KernelError, KernelResult},
    fs::FdTable,
};

pub type TaskId = u64;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not yet enqueued.
    New,
    /// On a run queue.
    Ready,
    /// Executing on the CPU. Exactly one task per CPU.
    Running,
    /// Waiting for an event.
    Blocked,
    /// Exited; awaiting the reaper.
    Zombie,
}

/// Scheduling priorities; lower numeric value runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
    /// Only the always-ready idle task lives here.
    Idle = 3,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }

    /// Time slice for this priority, in timer ticks.
    pub fn time_slice(self) -> u32 {
        let ms_per_tick = 1000 / crate::drivers::timer::tick_hz().max(1);
        let ticks = (config::TIME_SLICE_MS / ms_per_tick.max(1)).max(1) as u32;
        ticks * config::TIME_SLICE_TICKS[self.index()]
    }
}

/// Per-task counters, read by `ps`.
#[derive(Debug, Default)]
pub struct TaskStats {
    /// Ticks spent as the Running task.
    pub runtime_ticks: AtomicU64,
    /// Times this task has been switched in.
    pub run_count: AtomicU64,
}

/// A kernel stack with an unmapped guard page below it.
pub struct KernelStack {
    #[cfg(target_os = "none")]
    frames: crate::mm::FrameNumber,
    #[cfg(target_os = "none")]
    pages: usize,
    #[cfg(not(target_os = "none"))]
    storage: alloc::vec::Vec<u8>,
}

impl KernelStack {
    /// Stack pages plus one guard page.
    #[cfg(target_os = "none")]
    pub fn allocate() -> KernelResult<Self> {
        use crate::mm::{frame_allocator, page_table, VirtualAddress, PAGE_SIZE};

        let pages = config::KERNEL_STACK_SIZE / PAGE_SIZE;
        let guard_pages = config::STACK_GUARD_SIZE / PAGE_SIZE;
        let frames = frame_allocator::alloc(pages + guard_pages, 1)?;

        // Unmap the guard so a stack overflow faults instead of silently
        // corrupting whatever sits below.
        let guard_virt = VirtualAddress::new(frames.as_addr().as_u64());
        page_table::with_kernel_space(|space| space.unmap(guard_virt, guard_pages))
            .transpose()?;
        Ok(Self {
            frames,
            pages: pages + guard_pages,
        })
    }

    #[cfg(not(target_os = "none"))]
    pub fn allocate() -> KernelResult<Self> {
        Ok(Self {
            storage: alloc::vec![0u8; config::KERNEL_STACK_SIZE],
        })
    }

    /// Highest usable address (exclusive).
    pub fn top(&self) -> usize {
        #[cfg(target_os = "none")]
        {
            self.frames.as_addr().as_u64() as usize + self.pages * crate::mm::PAGE_SIZE
        }

        #[cfg(not(target_os = "none"))]
        {
            self.storage.as_ptr() as usize + self.storage.len()
        }
    }
}

#[cfg(target_os = "none")]
impl Drop for KernelStack {
    fn drop(&mut self) {
        use crate::mm::{frame_allocator, page_table, PhysicalAddress, VirtualAddress};

        let guard_pages = config::STACK_GUARD_SIZE / crate::mm::PAGE_SIZE;
        let base = self.frames.as_addr().as_u64();
        // Restore the guard mapping, then give all frames back.
        let _ = page_table::with_kernel_space(|space| {
            space.map(
                VirtualAddress::new(base),
                PhysicalAddress::new(base),
                guard_pages,
                crate::mm::page_table::MapFlags::kernel_rw(),
                true,
            )
        });
        if let Err(e) = frame_allocator::free(self.frames, self.pages) {
            log::error!("kernel stack free failed: {:?}", e);
        }
    }
}

/// Task control block.
pub struct Task {
    id: TaskId,
    name: String,
    priority: Priority,
    state: Mutex<TaskState>,
    /// Saved registers. Only the scheduler touches this, with preemption
    /// disabled; stale while the task is Running.
    context: UnsafeCell<Context>,
    /// None for the bootstrap task, which runs on the boot stack.
    _kernel_stack: Option<KernelStack>,
    fd_table: Arc<FdTable>,
    cwd: Mutex<String>,
    /// Ticks left in the current slice.
    time_slice: AtomicU32,
    pub stats: TaskStats,
    exit_code: AtomicI32,
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

// SAFETY: the UnsafeCell<Context> is only accessed by the scheduler during
// a context switch, with interrupts disabled on a single CPU; all other
// fields are Sync on their own.
unsafe impl Sync for Task {}
unsafe impl Send for Task {}

impl Task {
    /// Build a fresh task in `New` state with its own stack and an initial
    /// context that starts at `entry` with `arg` in the argument register.
    pub fn new(
        id: TaskId,
        name: String,
        entry: usize,
        arg: usize,
        priority: Priority,
    ) -> KernelResult<Arc<Self>> {
        if entry == 0 {
            return Err(KernelError::InvalidArgument {
                what: "zero task entry point",
            });
        }
        let stack = KernelStack::allocate()?;
        let context = Context::new(entry, stack.top(), arg, task_exit_landing as usize);
        Ok(Arc::new(Self {
            id,
            name,
            priority,
            state: Mutex::new(TaskState::New),
            context: UnsafeCell::new(context),
            _kernel_stack: Some(stack),
            fd_table: Arc::new(FdTable::with_stdio()),
            cwd: Mutex::new(String::from("/")),
            time_slice: AtomicU32::new(priority.time_slice()),
            stats: TaskStats::default(),
            exit_code: AtomicI32::new(0),
        }))
    }

    /// TCB for the context the kernel booted on: already Running, no owned
    /// stack, context filled in by the first switch away.
    pub fn bootstrap(id: TaskId, name: String, priority: Priority) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            priority,
            state: Mutex::new(TaskState::Running),
            context: UnsafeCell::new(Context::empty()),
            _kernel_stack: None,
            fd_table: Arc::new(FdTable::with_stdio()),
            cwd: Mutex::new(String::from("/")),
            time_slice: AtomicU32::new(priority.time_slice()),
            stats: TaskStats::default(),
            exit_code: AtomicI32::new(0),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    pub fn fd_table(&self) -> Arc<FdTable> {
        self.fd_table.clone()
    }

    pub fn cwd(&self) -> String {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, cwd: String) {
        *self.cwd.lock() = cwd;
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Relaxed)
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Relaxed);
    }

    /// Debit one tick; true when the slice is exhausted.
    pub fn debit_time_slice(&self) -> bool {
        self.stats.runtime_ticks.fetch_add(1, Ordering::Relaxed);
        let left = self.time_slice.load(Ordering::Relaxed).saturating_sub(1);
        self.time_slice.store(left, Ordering::Relaxed);
        left == 0
    }

    pub fn reset_time_slice(&self) {
        self.time_slice
            .store(self.priority.time_slice(), Ordering::Relaxed);
    }

    /// Raw context pointer for the switch path.
    ///
    /// # Safety
    ///
    /// Only the scheduler may use this, with interrupts disabled, and
    /// never for the Running task's own context while it runs.
    pub unsafe fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }
}

/// Where a task entry function lands if it returns instead of calling
/// exit.
pub extern "C" fn task_exit_landing() -> ! {
    super::exit(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_new_with_entry_context() {
        let task = Task::new(7, String::from("worker"), 0x4000, 99, Priority::Normal).unwrap();
        assert_eq!(task.id(), 7);
        assert_eq!(task.state(), TaskState::New);
        // SAFETY: single-threaded test; nothing else touches the context.
        let ctx = unsafe { &*task.context_ptr() };
        assert_eq!(ctx.instruction_pointer(), 0x4000);
        assert_eq!(ctx.argument(), 99);
        assert!(ctx.stack_pointer() != 0);
    }

    #[test]
    fn zero_entry_rejected() {
        let err = Task::new(1, String::from("bad"), 0, 0, Priority::Normal).unwrap_err();
        assert_eq!(
            err,
            KernelError::InvalidArgument {
                what: "zero task entry point"
            }
        );
    }

    #[test]
    fn priorities_order_high_first() {
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert!(Priority::Low < Priority::Idle);
    }

    #[test]
    fn time_slice_debits_to_zero() {
        let task = Task::new(2, String::from("t"), 0x1000, 0, Priority::Normal).unwrap();
        task.time_slice.store(2, Ordering::Relaxed);
        assert!(!task.debit_time_slice());
        assert!(task.debit_time_slice());
        task.reset_time_slice();
        assert!(task.time_slice.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn stdio_descriptors_present() {
        let task = Task::new(3, String::from("t"), 0x1000, 0, Priority::Normal).unwrap();
        assert_eq!(task.fd_table().open_count(), 3);
    }
}
