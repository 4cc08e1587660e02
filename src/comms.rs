//! Commands exchanged with kuang's units.

use std::fmt;

//----------- Facility ----------------------------------------------------------

/// A subsystem of the application.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Facility {
    Generator,
    Xfr,
    Scanner,
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Facility::Generator => "Generator",
            Facility::Xfr => "XFR",
            Facility::Scanner => "Scanner",
        })
    }
}

//----------- Cmd ----------------------------------------------------------------

/// A command sent to a unit's worker pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cmd {
    Start,
    Stop,
    Pause,
    StartOne,
    StopOne,
}

//----------- Payload --------------------------------------------------------------

/// Data carried alongside a [`Cmd`].
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Int(i64),
    Float(f64),
    Text(String),
    Facility(Facility),
}

//----------- Message --------------------------------------------------------------

/// A message sent to a worker loop.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub tag: Cmd,
    pub payload: Option<Payload>,
}

impl Message {
    pub fn new(tag: Cmd) -> Self {
        Self { tag, payload: None }
    }

    pub fn with_payload(tag: Cmd, payload: Payload) -> Self {
        Self {
            tag,
            payload: Some(payload),
        }
    }
}

//----------- ApplicationCommand ---------------------------------------------------

/// A command routed from the daemon entry point to one of the units managed
/// by [`crate::manager`].
#[derive(Clone, Debug, PartialEq)]
pub enum ApplicationCommand {
    /// Start every worker in a facility.
    Start(Facility),
    /// Stop every worker in a facility.
    Stop(Facility),
    /// Start one additional worker in a facility.
    StartOne(Facility),
    /// Stop one worker in a facility.
    StopOne(Facility),
    /// Shut the unit down entirely.
    Terminate,
}

//----------- Terminated -----------------------------------------------------------

/// A unit's command channel has been closed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Terminated;

impl fmt::Display for Terminated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a unit's command channel was terminated")
    }
}

impl std::error::Error for Terminated {}
