//! Session layer of the opening trainer: the Learn/Practice/Explore/Edit
//! state machine on top of `repertoire-core`, plus the tokio driver that
//! owns timers and the animation queue.

pub use repertoire_core;

pub mod config;
pub mod controller;
pub mod driver;
pub mod effect;
pub mod error;
pub mod event;
pub mod gateway;

pub use config::SessionConfig;
pub use controller::{Mode, SessionController};
pub use driver::SessionDriver;
pub use effect::{Effect, Feedback};
pub use error::SessionError;
pub use event::{Command, Event, TimerToken};
pub use gateway::{PersistenceGateway, RenderingSurface};
