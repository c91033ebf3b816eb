//! Launch bootloader.
//!
//! Reprograms targets exposing a command endpoint and a data endpoint.
//! Every operation is a single sequential exchange; the flash layout is
//! read once per session and used to split a sparse image into row packets.

use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod chunker;
pub mod descriptor;
pub mod dummy;
pub mod ihex;
pub mod protocol;

pub use chunker::{Chunker, ImageError, RowPacket};
pub use descriptor::{AddressingWidth, DescriptorError, FlashDescriptor};
pub use protocol::{Command, Endpoint};

use protocol::APP_MODE_LOCK;

/// Byte channel to the target
///
/// Operations return `WouldBlock` until complete, the programmer waits on
/// each before issuing the next.
pub trait Channel<E> {
    fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> nb::Result<(), E>;
    fn read(&mut self, endpoint: Endpoint) -> nb::Result<Vec<u8>, E>;
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Init,
    Connected,
    Described,
    Programmed,
    Locked,
}

#[derive(Debug, thiserror::Error)]
pub enum Error<E: core::fmt::Debug> {
    #[error("transport error: {0:?}")]
    Transport(E),
    #[error("malformed flash info: {0}")]
    MalformedResponse(#[from] DescriptorError),
    #[error("malformed image: {0}")]
    MalformedImage(#[from] ImageError),
    #[error("flash info has not been read")]
    NoDescriptor,
}

#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Do not initialise the command channel on connection
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_init: bool,

    /// Leave the target in bootloader mode after programming
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_lock: bool,

    /// Period to wait after each packet write
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0"))]
    pub packet_delay_ms: u32,
}

pub struct Programmer<C, D, E> {
    state: State,
    options: Options,
    channel: C,
    delay: D,
    descriptor: Option<FlashDescriptor>,
    _err: PhantomData<E>,
}

impl<C, D, E> Programmer<C, D, E>
where
    C: Channel<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(channel: C, delay: D, options: Options) -> Self {
        Self {
            state: State::Init,
            options,
            channel,
            delay,
            descriptor: None,
            _err: PhantomData,
        }
    }

    /// Fetch the programmer state
    pub fn state(&self) -> State {
        self.state
    }

    /// Flash descriptor read for this session
    pub fn descriptor(&self) -> Option<FlashDescriptor> {
        self.descriptor
    }

    /// Fetch the underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<(), Error<E>> {
        block!(self.channel.write(endpoint, data)).map_err(Error::Transport)
    }

    fn read(&mut self, endpoint: Endpoint) -> Result<Vec<u8>, Error<E>> {
        block!(self.channel.read(endpoint)).map_err(Error::Transport)
    }

    /// Execute a full session: connect, describe, program and lock
    pub fn run<T, B>(&mut self, image: T) -> Result<usize, Error<E>>
    where
        T: IntoIterator<Item = (u32, B)>,
        B: AsRef<[u8]>,
    {
        self.init()?;

        let mode = self.execution_mode()?;
        info!("Execution mode: {:02x?}", mode);

        let version = self.version()?;
        info!("Bootloader version: {:02x?}", version);

        let d = self.flash_info()?;
        info!(
            "Flash: {:?} addressing, row size {}, base row {}",
            d.addressing_width, d.row_size, d.program_base_row
        );

        let n = self.program(image)?;

        if !self.options.no_lock {
            self.lock_app_mode()?;
        }

        Ok(n)
    }

    pub fn init(&mut self) -> Result<(), Error<E>> {
        if !self.options.no_init {
            debug!("Draining command endpoint");
            self.read(Endpoint::Command)?;

            debug!("Initialising command channel");
            self.write(Endpoint::Command, &[Command::Initialize as u8])?;
        }

        self.state = State::Connected;

        Ok(())
    }

    /// Issue a command and return the data endpoint response
    pub fn execute(&mut self, command: Command, parameter: u8) -> Result<Vec<u8>, Error<E>> {
        debug!("Executing {:?} (0x{:02x})", command, parameter);

        self.write(Endpoint::Command, &[command as u8])?;
        self.write(Endpoint::Data, &[parameter])?;

        let status = self.read(Endpoint::Command)?;
        trace!("Status: {:02x?}", status);

        let data = self.read(Endpoint::Data)?;
        trace!("Response: {:02x?}", data);

        Ok(data)
    }

    pub fn execution_mode(&mut self) -> Result<Vec<u8>, Error<E>> {
        self.execute(Command::GetExecutionMode, 0x00)
    }

    pub fn version(&mut self) -> Result<Vec<u8>, Error<E>> {
        self.execute(Command::GetVersion, 0x00)
    }

    /// Read and validate the flash layout, retained for the session
    pub fn flash_info(&mut self) -> Result<FlashDescriptor, Error<E>> {
        let raw = self.execute(Command::GetFlashInfo, 0x00)?;

        let d = FlashDescriptor::decode(&raw)?;
        d.validate()?;

        debug!("Flash descriptor: {:?}", d);

        self.descriptor = Some(d);
        self.state = State::Described;

        Ok(d)
    }

    /// Build the write plan for an image
    pub fn plan<T, B>(&self, image: T) -> Result<Chunker<T::IntoIter, B>, Error<E>>
    where
        T: IntoIterator<Item = (u32, B)>,
        B: AsRef<[u8]>,
    {
        let d = self.descriptor.ok_or(Error::NoDescriptor)?;
        Ok(Chunker::new(d, image)?)
    }

    /// Send a single packet to the data endpoint
    pub fn write_packet(&mut self, packet: &RowPacket) -> Result<(), Error<E>> {
        trace!(
            "Row {} line {}: {:02x?}",
            packet.row,
            packet.line,
            packet.as_bytes()
        );

        self.write(Endpoint::Data, packet.as_bytes())?;

        if self.options.packet_delay_ms > 0 {
            self.delay.delay_ms(self.options.packet_delay_ms);
        }

        Ok(())
    }

    /// Write an image, returning the number of packets sent
    ///
    /// Packets already sent when an image error is found are not rolled back.
    pub fn program<T, B>(&mut self, image: T) -> Result<usize, Error<E>>
    where
        T: IntoIterator<Item = (u32, B)>,
        B: AsRef<[u8]>,
    {
        if self.descriptor.is_none() {
            self.flash_info()?;
        }

        let mut row = None;
        let mut count = 0;

        for p in self.plan(image)? {
            let p = p?;

            if row != Some(p.row) {
                debug!("Programming row {}", p.row);
                row = Some(p.row);
            }

            self.write_packet(&p)?;
            count += 1;
        }

        info!("Wrote {} packets", count);
        self.state = State::Programmed;

        Ok(count)
    }

    /// Return the target to application mode
    pub fn lock_app_mode(&mut self) -> Result<(), Error<E>> {
        debug!("Locking application mode");

        self.write(Endpoint::Command, &[Command::LockAppMode as u8])?;
        self.write(Endpoint::Data, &APP_MODE_LOCK)?;

        self.state = State::Locked;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyChannel, DummyError, NoDelay};
    use pretty_assertions::assert_eq;

    const INFO_16: [u8; 7] = [0x10, 0x00, 0xF0, 0x00, 0x08, 0x00, 0x80];

    fn programmer(c: DummyChannel) -> Programmer<DummyChannel, NoDelay, DummyError> {
        Programmer::new(c, NoDelay, Options::default())
    }

    #[test]
    fn init_drains_then_resets() {
        let mut p = programmer(DummyChannel::new(&INFO_16));
        p.init().unwrap();

        assert_eq!(p.state(), State::Connected);
        assert_eq!(p.channel().writes(), &[(Endpoint::Command, vec![0x00])][..]);
    }

    #[test]
    fn init_skipped() {
        let options = Options {
            no_init: true,
            ..Options::default()
        };
        let mut p = Programmer::new(DummyChannel::new(&INFO_16), NoDelay, options);
        p.init().unwrap();

        assert!(p.channel().writes().is_empty());
    }

    #[test]
    fn execute_exchange() {
        let c = DummyChannel::new(&INFO_16).with_response(Command::GetVersion, &[0x02, 0x07]);
        let mut p = programmer(c);

        assert_eq!(p.version().unwrap(), vec![0x02, 0x07]);
        assert_eq!(
            p.channel().writes(),
            &[
                (Endpoint::Command, vec![0x05]),
                (Endpoint::Data, vec![0x00])
            ][..]
        );

        p.execution_mode().unwrap();
        assert_eq!(p.channel().writes()[2], (Endpoint::Command, vec![0x03]));
    }

    #[test]
    fn execute_waits_on_busy_channel() {
        let mut p = programmer(DummyChannel::new(&INFO_16).with_busy(3));

        let d = p.flash_info().unwrap();
        assert_eq!(d.row_size, 128);
        assert_eq!(p.state(), State::Described);
        assert_eq!(p.descriptor(), Some(d));
    }

    #[test]
    fn transport_failure() {
        let mut p = programmer(DummyChannel::new(&INFO_16).with_failure(Endpoint::Data));

        match p.version() {
            Err(Error::Transport(DummyError::Failed(Endpoint::Data))) => (),
            r => panic!("unexpected result: {:?}", r),
        }
    }

    #[test]
    fn malformed_flash_info() {
        let c = DummyChannel::new(&[0x10, 0x00]);
        let mut p = programmer(c);

        match p.flash_info() {
            Err(Error::MalformedResponse(DescriptorError::Length(2))) => (),
            r => panic!("unexpected result: {:?}", r),
        }
        assert_eq!(p.descriptor(), None);
    }

    #[test]
    fn plan_requires_descriptor() {
        let p = programmer(DummyChannel::new(&INFO_16));
        let image: Vec<(u32, Vec<u8>)> = vec![];

        assert!(matches!(p.plan(image), Err(Error::NoDescriptor)));
    }

    #[test]
    fn program_writes_packets() {
        let mut p = programmer(DummyChannel::new(&INFO_16));
        p.flash_info().unwrap();

        let image = vec![(2048u32, vec![0x01, 0x02, 0x03, 0x00])];
        assert_eq!(p.program(image).unwrap(), 1);
        assert_eq!(p.state(), State::Programmed);

        let packets: Vec<_> = p.channel().data_writes().skip(1).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..4], &[0x00, 0x01, 0x02, 0x03]);
        assert_eq!(&packets[0][4..], &[0xFF; 15]);
    }

    #[test]
    fn lock_app_mode() {
        let mut p = programmer(DummyChannel::new(&INFO_16));
        p.lock_app_mode().unwrap();

        assert_eq!(p.state(), State::Locked);
        assert_eq!(
            p.channel().writes(),
            &[
                (Endpoint::Command, vec![0x0D]),
                (Endpoint::Data, vec![0x4F, 0x4B])
            ][..]
        );
    }
}
