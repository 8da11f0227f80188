pub mod resp;
pub mod ring_buffer;

pub use resp::{ParseOutcome, ProtocolError, RespParser};
pub use ring_buffer::{ReadSpans, RingBuffer, RingRead, RingWrite, WriteSpans};
