use serde::{Deserialize, Serialize};

use crate::prelude::{QcError, QcResult};
use crate::radar_interface::beam::BeamMessage;

/// Scan boundary markers delivered in-band with the beam stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFlags {
    pub start_of_sweep: bool,
    pub end_of_sweep: bool,
    pub start_of_volume: bool,
    pub end_of_volume: bool,
}

impl SweepFlags {
    pub fn start_of_volume() -> Self {
        Self {
            start_of_volume: true,
            start_of_sweep: true,
            ..Default::default()
        }
    }

    pub fn end_of_volume() -> Self {
        Self {
            end_of_volume: true,
            end_of_sweep: true,
            ..Default::default()
        }
    }

    pub fn any(&self) -> bool {
        self.start_of_sweep || self.end_of_sweep || self.start_of_volume || self.end_of_volume
    }
}

/// One inbound or outbound radar message. A message may carry a beam, flags,
/// or both; flags ride alongside the beam they arrived with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarMessage {
    pub beam: Option<BeamMessage>,
    pub flags: Option<SweepFlags>,
}

impl RadarMessage {
    pub fn beam(beam: BeamMessage) -> Self {
        Self {
            beam: Some(beam),
            flags: None,
        }
    }

    pub fn flags(flags: SweepFlags) -> Self {
        Self {
            beam: None,
            flags: Some(flags),
        }
    }

    pub fn has_beam(&self) -> bool {
        self.beam.is_some()
    }
}

/// Destination for outbound message streams: the filtered beam stream and the
/// optional interest/confidence/feature diagnostic streams.
pub trait MessageSink {
    fn put_message(&mut self, msg: RadarMessage) -> QcResult<()>;
}

/// Sink that collects messages in memory; used by tests and the offline driver.
#[derive(Debug, Default)]
pub struct VecSink {
    messages: Vec<RadarMessage>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[RadarMessage] {
        &self.messages
    }

    pub fn beams(&self) -> impl Iterator<Item = &BeamMessage> {
        self.messages.iter().filter_map(|m| m.beam.as_ref())
    }

    pub fn take(&mut self) -> Vec<RadarMessage> {
        std::mem::take(&mut self.messages)
    }
}

impl MessageSink for VecSink {
    fn put_message(&mut self, msg: RadarMessage) -> QcResult<()> {
        self.messages.push(msg);
        Ok(())
    }
}

/// Cloneable handle to a shared in-memory sink; lets a caller keep
/// inspecting a stream it has handed to the pipeline. The engine is
/// single-threaded by design, so `Rc<RefCell<_>>` suffices.
#[derive(Clone, Default)]
pub struct SharedVecSink {
    inner: std::rc::Rc<std::cell::RefCell<VecSink>>,
}

impl SharedVecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<RadarMessage> {
        self.inner.borrow().messages().to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageSink for SharedVecSink {
    fn put_message(&mut self, msg: RadarMessage) -> QcResult<()> {
        self.inner.borrow_mut().put_message(msg)
    }
}

/// Sink that rejects everything; exercises the emission-failure path.
#[cfg(test)]
pub(crate) struct FailingSink;

#[cfg(test)]
impl MessageSink for FailingSink {
    fn put_message(&mut self, _msg: RadarMessage) -> QcResult<()> {
        Err(QcError::Emission("sink closed".to_string()))
    }
}
