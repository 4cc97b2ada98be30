pub mod cli;
pub mod util;

/// Why an instance handed control back to the embedder
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// Reached the end of a video frame
    Vsync,
    /// A debugger breakpoint was hit
    Breakpoint(u32),
}

/// Synchronous instance of an emulator core
pub trait Instance {
    fn name(&self) -> &'static str;

    /// Runs until the next cooperative yield point
    fn run(&mut self) -> Result<Status, anyhow::Error>;

    fn reset(&mut self) -> Result<(), anyhow::Error>;

    fn as_any(&mut self) -> &mut dyn std::any::Any;
}
