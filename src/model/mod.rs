//! Mappings of objects received from the control gateway and REST API, with
//! implementations for (de)serialisation.

pub mod event;
pub mod gateway;
pub mod id;
pub mod interaction;
pub mod message;
pub mod voice;
mod util;

pub use self::event::{Envelope, Event, GatewayEvent, Opcode};
