//! Session lifecycle orchestration for remote sandboxes.
//!
//! Provides:
//! - `SessionController` - Create, pause, resume and delete sessions
//! - `SandboxClient` - Remote handles shared by a controller
//! - Backend implementations (memory)

pub mod backend;
pub mod client;
pub mod controller;
pub mod params;

pub use client::SandboxClient;
pub use controller::{LINK_PORT_MAX, LINK_PORT_MIN, Session, SessionController};
pub use params::{AppManagerRule, AppRuleType, CreateSessionParams, ExtraConfigs, MobileExtraConfig};
