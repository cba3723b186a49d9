//! Integration tests exercising the stream controller and device against the
//! software platform.
//!
//! ```text
//! SoftDma.fire("rx") → RingBuffer(capture) → Session.read()
//! Session.write() → RingBuffer(playback) ← SoftDma.fire("tx")
//! ```
//!
//! The hardware collaborator is a recording mock that also notes whether
//! both DMA channels were armed when it was started.

#[cfg(feature = "sim")]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use crate::constants::FIFO_OFFSET;
    use crate::control::HardwareControl;
    use crate::dma::Direction;
    use crate::error::{AllocError, DmaError, Error};
    use crate::pcm::registers as reg;
    use crate::pcm::PcmInterface;
    use crate::sim::{HeapMemory, RegisterFile, SoftDma};
    use crate::stream::{Device, StreamController, StreamState};

    #[derive(Debug, thiserror::Error)]
    #[error("interface clock not locked")]
    struct ClockFault;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Start { tx_armed: bool, rx_armed: bool },
        Stop,
    }

    #[derive(Clone)]
    struct RecordingHardware {
        dma: SoftDma,
        events: Arc<Mutex<Vec<Event>>>,
        fail_start: Arc<AtomicBool>,
        fail_stop: Arc<AtomicBool>,
    }

    impl RecordingHardware {
        fn new(dma: &SoftDma) -> Self {
            Self {
                dma: dma.clone(),
                events: Arc::default(),
                fail_start: Arc::default(),
                fail_stop: Arc::default(),
            }
        }

        fn fail_next_start(&self) {
            self.fail_start.store(true, Ordering::SeqCst);
        }

        /// Every later `stop` reports a fault after recording itself.
        fn fail_stops(&self) {
            self.fail_stop.store(true, Ordering::SeqCst);
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    impl HardwareControl for RecordingHardware {
        type Error = ClockFault;

        fn start(&mut self) -> Result<(), ClockFault> {
            self.events.lock().unwrap().push(Event::Start {
                tx_armed: self.dma.is_armed("tx"),
                rx_armed: self.dma.is_armed("rx"),
            });
            if self.fail_start.swap(false, Ordering::SeqCst) {
                return Err(ClockFault);
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<(), ClockFault> {
            self.events.lock().unwrap().push(Event::Stop);
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(ClockFault);
            }
            Ok(())
        }
    }

    type TestController = StreamController<HeapMemory, SoftDma, RecordingHardware>;

    fn rig_with(memory: HeapMemory) -> (TestController, SoftDma, RecordingHardware) {
        let dma = SoftDma::new();
        let hardware = RecordingHardware::new(&dma);
        let controller = StreamController::new(memory, dma.clone(), hardware.clone()).unwrap();
        (controller, dma, hardware)
    }

    fn rig() -> (TestController, SoftDma, RecordingHardware) {
        rig_with(HeapMemory::new())
    }

    /// Formatted log output of everything run under [`LogCapture::run`].
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn run<T>(&self, f: impl FnOnce() -> T) -> T {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .finish();
            tracing::subscriber::with_default(subscriber, f)
        }

        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const STARTED: Event = Event::Start {
        tx_armed: true,
        rx_armed: true,
    };

    // ---------------------------------------------------------------
    // Start: both channels armed over their rings before the interface
    // ---------------------------------------------------------------
    #[test]
    fn start_arms_dma_then_hardware() {
        let (mut ctl, dma, hw) = rig();
        assert_eq!(dma.open_channels(), 2);
        assert_eq!(dma.address_offset("tx"), Some(FIFO_OFFSET));
        assert_eq!(dma.address_offset("rx"), Some(FIFO_OFFSET));

        ctl.start(48, 4).unwrap();
        assert_eq!(ctl.state(), StreamState::Running);
        assert_eq!(hw.events(), vec![STARTED]);

        let tx = dma.transfer("tx").unwrap();
        assert_eq!(tx.direction, Direction::Playback);
        assert_eq!(tx.period_size, 192);
        assert_eq!(tx.total_size, 768);
        assert_eq!(tx.phys_addr, ctl.ring(Direction::Playback).unwrap().phys_addr());

        let rx = dma.transfer("rx").unwrap();
        assert_eq!(rx.direction, Direction::Capture);
        assert_eq!(rx.phys_addr, ctl.ring(Direction::Capture).unwrap().phys_addr());
        assert_ne!(rx.phys_addr, tx.phys_addr);

        assert_eq!(ctl.memory().live_regions(), 2);
        assert_eq!(ctl.memory().live_bytes(), 2 * 768);
    }

    // ---------------------------------------------------------------
    // 48 frames x 4 periods, driven through the controller
    // ---------------------------------------------------------------
    #[test]
    fn capture_scenario_through_controller() {
        let (mut ctl, dma, _hw) = rig();
        ctl.start(48, 4).unwrap();
        let geometry = ctl.geometry().unwrap();
        assert_eq!(geometry.period_size(), 192);
        assert_eq!(geometry.total_size(), 768);

        for _ in 0..3 {
            assert!(dma.fire("rx"));
        }
        assert_eq!(ctl.available(Direction::Capture).unwrap(), 576);
        assert_eq!(ctl.available(Direction::Playback).unwrap(), 0);

        let mut period = [0u8; 192];
        assert_eq!(ctl.read(&mut period).unwrap(), 192);
        assert_eq!(ctl.available(Direction::Capture).unwrap(), 384);
        assert_eq!(ctl.ring(Direction::Capture).unwrap().consumer_offset(), 192);

        dma.fire("rx");
        dma.fire("rx");
        assert_eq!(ctl.available(Direction::Capture).unwrap(), 768);
        assert_eq!(ctl.xruns(Direction::Capture).unwrap(), 0);

        dma.fire("rx");
        assert_eq!(ctl.xruns(Direction::Capture).unwrap(), 1);
        assert!(ctl.read(&mut period).unwrap_err().is_overrun());
        assert_eq!(ctl.xruns(Direction::Playback).unwrap(), 0);
    }

    #[test]
    fn wrong_transfer_size_is_rejected() {
        let (mut ctl, dma, _hw) = rig();
        ctl.start(48, 4).unwrap();
        dma.fire("rx");

        let mut short = [0u8; 100];
        assert!(matches!(
            ctl.read(&mut short),
            Err(Error::SizeMismatch {
                expected: 192,
                actual: 100
            })
        ));
        assert_eq!(ctl.available(Direction::Capture).unwrap(), 192);
        assert!(ctl.is_running());
    }

    // ---------------------------------------------------------------
    // A second start is refused without disturbing the first
    // ---------------------------------------------------------------
    #[test]
    fn second_start_is_busy_and_leaves_stream_intact() {
        let (mut ctl, dma, hw) = rig();
        ctl.start(48, 4).unwrap();
        let phys = ctl.ring(Direction::Capture).unwrap().phys_addr();
        dma.fire("rx");

        assert!(matches!(ctl.start(128, 4), Err(Error::Busy)));

        assert!(ctl.is_running());
        assert_eq!(ctl.geometry().unwrap().period_frames(), 48);
        assert_eq!(ctl.ring(Direction::Capture).unwrap().phys_addr(), phys);
        assert_eq!(ctl.available(Direction::Capture).unwrap(), 192);
        assert_eq!(ctl.memory().live_regions(), 2);
        assert!(dma.is_armed("tx") && dma.is_armed("rx"));
        assert_eq!(hw.events(), vec![STARTED]);
    }

    // ---------------------------------------------------------------
    // Stop: hardware, then DMA, then memory
    // ---------------------------------------------------------------
    #[test]
    fn stop_releases_everything() {
        let (mut ctl, dma, hw) = rig();
        ctl.start(48, 4).unwrap();
        let capture = ctl.ring(Direction::Capture).unwrap();

        ctl.stop().unwrap();
        assert_eq!(ctl.state(), StreamState::Stopped);
        assert_eq!(hw.events(), vec![STARTED, Event::Stop]);
        assert!(!dma.is_armed("tx"));
        assert!(!dma.is_armed("rx"));
        assert_eq!(ctl.memory().live_bytes(), 0);
        assert_eq!(ctl.memory().live_regions(), 0);
        assert!(capture.is_released());
        // Channels stay open for the next start.
        assert_eq!(dma.open_channels(), 2);

        assert!(matches!(ctl.stop(), Err(Error::NotRunning)));
    }

    #[test]
    fn operations_fail_when_stopped() {
        let (mut ctl, _dma, _hw) = rig();
        let mut period = [0u8; 192];
        assert!(matches!(ctl.read(&mut period), Err(Error::NotRunning)));
        assert!(matches!(ctl.write(&period), Err(Error::NotRunning)));
        assert!(matches!(ctl.restart(), Err(Error::NotRunning)));
        assert!(matches!(ctl.reset_xruns(), Err(Error::NotRunning)));
        assert!(matches!(
            ctl.available(Direction::Capture),
            Err(Error::NotRunning)
        ));
        assert!(ctl.geometry().is_none());
    }

    #[test]
    fn stream_can_be_started_again_after_stop() {
        let (mut ctl, dma, hw) = rig();
        ctl.start(48, 4).unwrap();
        ctl.stop().unwrap();
        ctl.start(96, 2).unwrap();

        assert_eq!(dma.transfer("rx").unwrap().period_size, 384);
        assert_eq!(ctl.available(Direction::Capture).unwrap(), 0);
        assert_eq!(hw.events(), vec![STARTED, Event::Stop, STARTED]);
    }

    // ---------------------------------------------------------------
    // Start rollback: nothing leaks when any step fails
    // ---------------------------------------------------------------
    #[test]
    fn rollback_on_allocation_failure() {
        // Room for the capture ring only.
        let (mut ctl, dma, hw) = rig_with(HeapMemory::with_budget(768 + 1));

        let err = ctl.start(48, 4).unwrap_err();
        assert!(matches!(
            err,
            Error::Alloc(AllocError::OutOfMemory { size: 768 })
        ));
        assert_eq!(ctl.state(), StreamState::Stopped);
        assert_eq!(ctl.memory().live_bytes(), 0);
        assert!(!dma.is_armed("tx") && !dma.is_armed("rx"));
        assert!(hw.events().is_empty());

        // Two smaller rings fit.
        ctl.start(24, 4).unwrap();
        assert_eq!(ctl.memory().live_bytes(), 768);
    }

    #[test]
    fn rollback_on_dma_failure() {
        let (mut ctl, dma, hw) = rig();
        dma.fail_next_start("rx");

        let err = ctl.start(48, 4).unwrap_err();
        assert!(matches!(err, Error::Dma(DmaError::Busy)));
        assert!(!dma.is_armed("tx"), "playback transfer must be stopped");
        assert_eq!(ctl.memory().live_regions(), 0);
        assert!(hw.events().is_empty());

        ctl.start(48, 4).unwrap();
        assert!(dma.is_armed("tx") && dma.is_armed("rx"));
    }

    #[test]
    fn rollback_on_hardware_failure() {
        let (mut ctl, dma, hw) = rig();
        hw.fail_next_start();

        let err = ctl.start(48, 4).unwrap_err();
        assert!(matches!(err, Error::Hardware(_)));
        assert_eq!(err.to_string(), "hardware control failed: interface clock not locked");
        assert_eq!(hw.events(), vec![STARTED, Event::Stop]);
        assert!(!dma.is_armed("tx") && !dma.is_armed("rx"));
        assert_eq!(ctl.memory().live_regions(), 0);
        assert!(!ctl.is_running());
    }

    #[test]
    fn rollback_logs_interface_stop_error() {
        let (mut ctl, dma, hw) = rig();
        hw.fail_next_start();
        hw.fail_stops();
        let logs = LogCapture::default();

        let err = logs.run(|| ctl.start(48, 4)).unwrap_err();
        assert!(matches!(err, Error::Hardware(_)));
        assert_eq!(hw.events(), vec![STARTED, Event::Stop]);
        assert!(!dma.is_armed("tx") && !dma.is_armed("rx"));
        assert_eq!(ctl.memory().live_regions(), 0);

        let output = logs.contents();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("error stopping interface after failed start"), "{output}");
        assert!(output.contains("stop_err=interface clock not locked"), "{output}");
    }

    #[test]
    fn rollback_on_invalid_geometry() {
        let (mut ctl, _dma, hw) = rig();
        assert!(matches!(
            ctl.start(0, 4),
            Err(Error::InvalidGeometry { .. })
        ));
        assert_eq!(ctl.memory().live_regions(), 0);
        assert!(hw.events().is_empty());
    }

    // ---------------------------------------------------------------
    // Restart: rings rewound, memory and DMA kept, xruns kept
    // ---------------------------------------------------------------
    #[test]
    fn restart_rewinds_rings_and_keeps_memory() {
        let (mut ctl, dma, hw) = rig();
        ctl.start(48, 4).unwrap();
        let capture = ctl.ring(Direction::Capture).unwrap();
        let playback = ctl.ring(Direction::Playback).unwrap();
        let (capture_phys, playback_phys) = (capture.phys_addr(), playback.phys_addr());

        for _ in 0..5 {
            dma.fire("rx");
        }
        dma.fire("tx");
        dma.fire("tx");
        playback.write(&[0x11; 192]).unwrap();
        assert_eq!(capture.xruns(), 1);

        ctl.restart().unwrap();
        assert_eq!(hw.events(), vec![STARTED, Event::Stop, STARTED]);

        for ring in [&capture, &playback] {
            assert_eq!(ring.available(), 0);
            assert_eq!(ring.producer_offset(), 0);
            assert_eq!(ring.consumer_offset(), 0);
            assert!(!ring.is_released());
        }
        assert_eq!(capture.xruns(), 1);
        assert_eq!(capture.phys_addr(), capture_phys);
        assert_eq!(playback.phys_addr(), playback_phys);
        assert_eq!(ctl.memory().live_regions(), 2);

        // DMA was never re-armed.
        assert_eq!(dma.periods("rx"), 5);

        let mut period = [0u8; 192];
        assert!(ctl.read(&mut period).unwrap_err().is_overrun());
        ctl.reset_xruns().unwrap();
        dma.fire("rx");
        assert_eq!(ctl.read(&mut period).unwrap(), 192);
    }

    #[test]
    fn failed_restart_stops_stream() {
        let (mut ctl, dma, hw) = rig();
        ctl.start(48, 4).unwrap();
        hw.fail_next_start();

        assert!(matches!(ctl.restart(), Err(Error::Hardware(_))));
        assert_eq!(ctl.state(), StreamState::Stopped);
        assert_eq!(ctl.memory().live_regions(), 0);
        assert!(!dma.is_armed("tx") && !dma.is_armed("rx"));
        assert_eq!(hw.events().last(), Some(&Event::Stop));
    }

    #[test]
    fn failed_restart_logs_teardown_error() {
        let (mut ctl, dma, hw) = rig();
        ctl.start(48, 4).unwrap();
        hw.fail_stops();
        let logs = LogCapture::default();

        assert!(matches!(logs.run(|| ctl.restart()), Err(Error::Hardware(_))));
        assert_eq!(ctl.state(), StreamState::Stopped);
        assert_eq!(ctl.memory().live_regions(), 0);
        assert!(!dma.is_armed("tx") && !dma.is_armed("rx"));
        assert_eq!(hw.events(), vec![STARTED, Event::Stop, Event::Stop]);

        let output = logs.contents();
        assert!(output.contains("restart failed, stopping stream"), "{output}");
        assert!(output.contains("error stopping stream after failed restart"), "{output}");
    }

    #[test]
    fn restart_under_running_clock_keeps_rings_consistent() {
        let (mut ctl, dma, _hw) = rig();
        ctl.start(48, 4).unwrap();
        let capture = ctl.ring(Direction::Capture).unwrap();
        let playback = ctl.ring(Direction::Playback).unwrap();

        let clock = dma.spawn_clock(Duration::from_micros(200));
        for _ in 0..200 {
            ctl.restart().unwrap();
            ctl.reset_xruns().unwrap();
        }
        drop(clock);

        // Nothing consumed since the last rewind: the producer sits exactly
        // as many periods past zero as are ready.
        for ring in [&capture, &playback] {
            let ready_periods = ring.available() / ring.period_size();
            assert_eq!(
                ring.producer_offset(),
                ready_periods % 4 * ring.period_size()
            );
            assert_eq!(ring.consumer_offset(), 0);
        }
    }

    // ---------------------------------------------------------------
    // Channel acquisition and teardown
    // ---------------------------------------------------------------
    #[test]
    fn channel_failure_closes_acquired_channel() {
        let dma = SoftDma::new().refuse_channel("rx");
        let hw = RecordingHardware::new(&dma);
        let result = StreamController::new(HeapMemory::new(), dma.clone(), hw);

        assert!(matches!(
            result,
            Err(Error::Alloc(AllocError::Channel { name: "rx" }))
        ));
        assert_eq!(dma.open_channels(), 0);
    }

    #[test]
    fn drop_while_running_stops_and_closes() {
        let (mut ctl, dma, hw) = rig();
        ctl.start(48, 4).unwrap();
        let capture = ctl.ring(Direction::Capture).unwrap();

        drop(ctl);
        assert_eq!(hw.events(), vec![STARTED, Event::Stop]);
        assert!(capture.is_released());
        assert_eq!(dma.open_channels(), 0);
        assert!(!dma.fire("rx"));
    }

    // ---------------------------------------------------------------
    // Device and session
    // ---------------------------------------------------------------
    fn device() -> (
        Device<HeapMemory, SoftDma, RecordingHardware>,
        SoftDma,
        RecordingHardware,
    ) {
        let dma = SoftDma::new();
        let hw = RecordingHardware::new(&dma);
        let device = Device::new(HeapMemory::new(), dma.clone(), hw.clone()).unwrap();
        (device, dma, hw)
    }

    #[test]
    fn device_allows_one_session() {
        let (device, _dma, _hw) = device();
        assert!(!device.is_open());

        let session = device.open().unwrap();
        assert!(device.is_open());
        assert!(matches!(device.open(), Err(Error::Busy)));

        session.close();
        assert!(!device.is_open());
        let _again = device.open().unwrap();
    }

    #[test]
    fn closing_session_stops_stream() {
        let (device, dma, hw) = device();
        let session = device.open().unwrap();
        session.start(48, 4).unwrap();
        assert!(session.is_running());

        drop(session);
        assert_eq!(hw.events(), vec![STARTED, Event::Stop]);
        assert!(!dma.is_armed("rx"));
        let (running, live) =
            device.with_controller(|ctl| (ctl.is_running(), ctl.memory().live_bytes()));
        assert!(!running);
        assert_eq!(live, 0);
    }

    #[test]
    fn session_overrun_recovery() {
        let (device, dma, _hw) = device();
        let session = device.open().unwrap();
        session.start(48, 4).unwrap();
        let mut period = [0u8; 192];

        for _ in 0..5 {
            dma.fire("rx");
        }
        let err = session.read(&mut period).unwrap_err();
        assert!(matches!(err, Error::Overrun { xruns: 1 }));
        assert_eq!(session.xruns(Direction::Capture).unwrap(), 1);

        session.restart().unwrap();
        session.reset_xruns().unwrap();
        assert_eq!(session.xruns(Direction::Capture).unwrap(), 0);
        assert_eq!(session.available(Direction::Capture).unwrap(), 0);

        dma.fire("rx");
        assert_eq!(session.read(&mut period).unwrap(), 192);
    }

    #[test]
    fn stop_wakes_blocked_reader() {
        let (device, _dma, _hw) = device();
        let session = device.open().unwrap();
        session.start(48, 4).unwrap();

        thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut period = [0u8; 192];
                session.read(&mut period)
            });
            thread::sleep(Duration::from_millis(20));
            session.stop().unwrap();
            assert!(matches!(reader.join().unwrap(), Err(Error::NotRunning)));
        });
        assert!(!session.is_running());
    }

    // ---------------------------------------------------------------
    // Reader and writer streaming concurrently
    // ---------------------------------------------------------------
    #[test]
    fn concurrent_reader_and_writer() {
        const PERIODS: usize = 32;
        let (device, dma, _hw) = device();
        let session = device.open().unwrap();
        session.start(48, 4).unwrap();
        let total = session.geometry().unwrap().total_size();

        thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut period = [0u8; 192];
                (0..PERIODS).try_for_each(|_| session.read(&mut period).map(drop))
            });
            let writer = s.spawn(|| {
                let period = [0x5Au8; 192];
                (0..PERIODS).try_for_each(|_| session.write(&period).map(drop))
            });

            // Act as the interface clock, never completing a period the
            // consumers have no room for.
            for direction in [Direction::Capture, Direction::Playback]
                .into_iter()
                .cycle()
                .take(2 * PERIODS)
            {
                while session.available(direction).unwrap() >= total {
                    thread::yield_now();
                }
                dma.fire(direction.channel_name());
            }

            reader.join().unwrap().unwrap();
            writer.join().unwrap().unwrap();
        });

        assert_eq!(session.xruns(Direction::Capture).unwrap(), 0);
        assert_eq!(session.xruns(Direction::Playback).unwrap(), 0);
        assert_eq!(session.available(Direction::Capture).unwrap(), 0);
        assert_eq!(dma.periods("rx"), PERIODS as u64);
    }

    // ---------------------------------------------------------------
    // Full stack with the PCM interface driver
    // ---------------------------------------------------------------
    #[test]
    fn pcm_interface_under_device() {
        let dma = SoftDma::new();
        let pcm = PcmInterface::new(RegisterFile::new());
        let device = Device::new(HeapMemory::new(), dma.clone(), pcm).unwrap();
        let session = device.open().unwrap();

        session.start(128, 4).unwrap();
        let cs = device.with_controller(|ctl| ctl.hardware().registers().value(reg::CS_A));
        let enabled = reg::CS_EN | reg::CS_DMAEN | reg::CS_TXON | reg::CS_RXON;
        assert_eq!(cs & enabled, enabled);
        assert_eq!(dma.transfer("tx").unwrap().period_size, 512);

        session.stop().unwrap();
        let cs = device.with_controller(|ctl| ctl.hardware().registers().value(reg::CS_A));
        assert_eq!(cs, 0);
        assert!(!device.with_controller(|ctl| ctl.hardware().is_running()));
    }

    #[test]
    fn soft_clock_drives_capture() {
        let (device, dma, _hw) = device();
        let session = device.open().unwrap();
        session.start(48, 8).unwrap();

        let clock = dma.spawn_clock(Duration::from_millis(2));
        let mut period = [0u8; 192];
        for _ in 0..4 {
            match session.read(&mut period) {
                Ok(n) => assert_eq!(n, 192),
                // A starved test thread may fall behind the clock.
                Err(err) if err.is_overrun() => {
                    session.restart().unwrap();
                    session.reset_xruns().unwrap();
                }
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        drop(clock);
        session.stop().unwrap();
    }

    #[test]
    fn dma_channels_are_reused_across_sessions() {
        let (device, dma, _hw) = device();
        for _ in 0..3 {
            let session = device.open().unwrap();
            session.start(48, 4).unwrap();
        }
        assert_eq!(dma.open_channels(), 2);
        assert!(!dma.is_armed("tx") && !dma.is_armed("rx"));
    }
}
