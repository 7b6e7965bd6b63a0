//! # Bittle Core Library
//!
//! Drives a Petoi Bittle quadruped over its serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A serial transport and line codec for the NyBoard's ASCII protocol
//! - A command session with handshake, acknowledgement tracking and fault handling
//! - An automation scheduler that performs random actions at random intervals
//! - A command queue and interactive training prompt
//! - Action-set and settings file loading
//!
//! ## Example
//!
//! ```rust,ignore
//! use bittle_core::protocol::{Command, SerialTransport, Session, SessionConfig};
//!
//! let config = SessionConfig { port_name: "/dev/ttyUSB0".into(), ..Default::default() };
//! let mut session = Session::new(SerialTransport::new(), config);
//! session.connect().await?;
//! session.send(&Command::new("ksit").with_duration(3.0)).await?;
//! session.park().await;
//! ```

pub mod action_set;
pub mod automate;
pub mod config;
pub mod protocol;
pub mod training;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::action_set::{Action, ActionSet};
    pub use crate::automate::{Scheduler, SchedulerConfig, SchedulerEvent, SchedulerSummary};
    pub use crate::config::{ConfigError, Settings};
    pub use crate::protocol::{
        Command, Outcome, SerialTransport, Session, SessionConfig, SessionError, SessionState,
        Transport,
    };
    pub use crate::training::{CommandQueue, ParseError, QueueLimits, TrainingRepl};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
