use linux_embedded_hal::Delay;

use crate::{Channel, Options, Programmer};

impl<C, E> Programmer<C, Delay, E>
where
    C: Channel<E>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance using the host delay
    pub fn linux(channel: C, options: Options) -> Self {
        Self::new(channel, Delay {}, options)
    }
}
