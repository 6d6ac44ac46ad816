pub mod context;
pub mod error;
pub mod interrupt;
pub mod io;
pub mod memory;
pub mod sim;

pub use context::*;
pub use error::*;
pub use interrupt::*;
pub use io::*;
pub use memory::*;
pub use sim::{SimConfig, SimMachine};

/// Lower-level machine the kernel runs on.
///
/// The machine owns raw execution contexts, the timer, asynchronous file
/// I/O and the backing RAM. The kernel never switches stacks itself; it
/// only decides which context runs next and asks the machine to switch.
pub trait Machine {
    /// Reserve `size` bytes of RAM for the kernel's exclusive use.
    fn map_memory(&mut self, size: usize) -> Result<Address, MachineError>;

    /// Create a context that starts executing `entry(argument)` on `stack`.
    fn create_context(
        &mut self,
        entry: ThreadEntry,
        argument: usize,
        stack: &StackRegion,
    ) -> Result<ContextRef, MachineError>;

    /// Context currently executing on the processor.
    fn current_context(&self) -> ContextRef;

    /// Save `from` and resume `to`. On real hardware this returns only
    /// when `from` is switched back in.
    fn switch_context(&mut self, from: ContextRef, to: ContextRef) -> Result<(), MachineError>;

    /// Discard a context that will never run again.
    fn release_context(&mut self, context: ContextRef);

    fn register_timer(&mut self, interval_ms: u64) -> Result<(), MachineError>;

    fn register_io_completion(&mut self) -> Result<(), MachineError>;

    fn copy_memory(&mut self, dst: Address, src: Address, len: usize) -> Result<(), MachineError>;

    /// Start an asynchronous request. Its completion is delivered later as
    /// `Interrupt::IoComplete` carrying the same token.
    fn submit_io(&mut self, token: IoToken, request: IoRequest) -> Result<(), MachineError>;
}
