use crate::io::IoToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// One timer period elapsed
    Timer,
    /// A request submitted through `Machine::submit_io` finished
    IoComplete { token: IoToken, result: i32 },
}

/// Trait that the kernel implements to receive machine interrupts.
///
/// The handler runs with exclusive access to the kernel state, which is
/// the only critical section a single-processor kernel needs.
pub trait InterruptHandler {
    type Error;

    fn handle_interrupt(&mut self, interrupt: Interrupt) -> Result<(), Self::Error>;
}
