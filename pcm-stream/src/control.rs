/// Trait for the audio interface that clocks frames to and from the DMA
/// FIFO (e.g. a PCM/I²S block).
///
/// The stream controller calls [`start()`](Self::start) after both DMA
/// channels are armed and [`stop()`](Self::stop) before they are torn down.
pub trait HardwareControl {
    /// Error type for control operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Configure the frame format and enable transmission.
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Disable the interface.
    fn stop(&mut self) -> Result<(), Self::Error>;
}
