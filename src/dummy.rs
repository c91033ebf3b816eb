//! Simulated target for dry runs and testing
//!
//! Answers reads based on the last opcode written to the command endpoint
//! and records every write, so a session can be replayed and inspected
//! without hardware.

use std::collections::HashMap;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::{Command, Endpoint};
use crate::Channel;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DummyError {
    #[error("no response configured for opcode 0x{0:02x}")]
    NoResponse(u8),
    #[error("endpoint {0:?} failed")]
    Failed(Endpoint),
}

/// Simulated target
#[derive(Debug, Clone, Default)]
pub struct DummyChannel {
    responses: HashMap<u8, Vec<u8>>,
    status: Vec<u8>,
    last: Option<u8>,
    busy: u8,
    pending: u8,
    fail: Option<Endpoint>,
    writes: Vec<(Endpoint, Vec<u8>)>,
}

impl DummyChannel {
    /// Create a target reporting the provided flash info response
    pub fn new(flash_info: &[u8]) -> Self {
        let mut responses = HashMap::new();
        responses.insert(Command::GetExecutionMode as u8, vec![0x01]);
        responses.insert(Command::GetVersion as u8, vec![0x01, 0x00]);
        responses.insert(Command::GetFlashInfo as u8, flash_info.to_vec());

        Self {
            responses,
            status: vec![0x00],
            ..Self::default()
        }
    }

    /// Override the data endpoint response to a command
    pub fn with_response(mut self, command: Command, data: &[u8]) -> Self {
        self.responses.insert(command as u8, data.to_vec());
        self
    }

    /// Report busy this many times before completing each endpoint operation
    pub fn with_busy(mut self, polls: u8) -> Self {
        self.busy = polls;
        self.pending = polls;
        self
    }

    /// Fail every operation on the provided endpoint
    pub fn with_failure(mut self, endpoint: Endpoint) -> Self {
        self.fail = Some(endpoint);
        self
    }

    /// Writes received, in order
    pub fn writes(&self) -> &[(Endpoint, Vec<u8>)] {
        &self.writes
    }

    /// Data endpoint writes received after the last command endpoint write
    pub fn data_writes(&self) -> impl Iterator<Item = &[u8]> {
        let from = self
            .writes
            .iter()
            .rposition(|(e, _)| *e == Endpoint::Command)
            .map_or(0, |i| i + 1);

        self.writes[from..]
            .iter()
            .filter(|(e, _)| *e == Endpoint::Data)
            .map(|(_, d)| &d[..])
    }

    fn poll(&mut self, endpoint: Endpoint) -> nb::Result<(), DummyError> {
        if self.fail == Some(endpoint) {
            return Err(nb::Error::Other(DummyError::Failed(endpoint)));
        }

        if self.pending > 0 {
            self.pending -= 1;
            return Err(nb::Error::WouldBlock);
        }

        self.pending = self.busy;
        Ok(())
    }
}

impl Channel<DummyError> for DummyChannel {
    fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> nb::Result<(), DummyError> {
        self.poll(endpoint)?;

        if endpoint == Endpoint::Command {
            self.last = data.first().cloned();

            match self.last.map(Command::from_opcode) {
                Some(Some(c)) => trace!("Target received {:?}", c),
                Some(None) => warn!("Target received unknown opcode {:02x?}", data),
                None => (),
            }
        }
        self.writes.push((endpoint, data.to_vec()));

        Ok(())
    }

    fn read(&mut self, endpoint: Endpoint) -> nb::Result<Vec<u8>, DummyError> {
        self.poll(endpoint)?;

        match (endpoint, self.last) {
            // Status is never interpreted, always report idle
            (Endpoint::Command, _) => Ok(self.status.clone()),
            (Endpoint::Data, Some(c)) => self
                .responses
                .get(&c)
                .cloned()
                .ok_or(nb::Error::Other(DummyError::NoResponse(c))),
            (Endpoint::Data, None) => Ok(vec![]),
        }
    }
}

/// Delay that returns immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn answers_last_command() {
        let mut c = DummyChannel::new(&[1, 2, 3]);

        c.write(Endpoint::Command, &[Command::GetFlashInfo as u8]).unwrap();
        c.write(Endpoint::Data, &[0x00]).unwrap();

        assert_eq!(c.read(Endpoint::Command).unwrap(), vec![0x00]);
        assert_eq!(c.read(Endpoint::Data).unwrap(), vec![1, 2, 3]);

        c.write(Endpoint::Command, &[0x42]).unwrap();
        assert!(matches!(
            c.read(Endpoint::Data),
            Err(nb::Error::Other(DummyError::NoResponse(0x42)))
        ));
    }

    #[test]
    fn busy_polls() {
        let mut c = DummyChannel::new(&[]).with_busy(2);

        assert!(matches!(c.write(Endpoint::Command, &[0x05]), Err(nb::Error::WouldBlock)));
        assert!(matches!(c.write(Endpoint::Command, &[0x05]), Err(nb::Error::WouldBlock)));
        assert!(matches!(c.write(Endpoint::Command, &[0x05]), Ok(())));
        assert_eq!(c.writes().len(), 1);

        assert!(matches!(c.read(Endpoint::Data), Err(nb::Error::WouldBlock)));
    }

    #[test]
    fn records_data_writes() {
        let mut c = DummyChannel::new(&[]);

        c.write(Endpoint::Data, &[9]).unwrap();
        c.write(Endpoint::Command, &[0x0D]).unwrap();
        c.write(Endpoint::Data, &[1]).unwrap();
        c.write(Endpoint::Data, &[2]).unwrap();

        let d: Vec<_> = c.data_writes().collect();
        assert_eq!(d, vec![&[1u8][..], &[2u8][..]]);
    }
}
