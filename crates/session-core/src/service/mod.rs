//! Services owning the sessions of an IMS module

pub mod core_listener;
pub mod dispatch;
pub mod imm_manager;
pub mod ims_module;
pub mod registry;
pub mod sharing_service;
pub mod sip_service;

pub use core_listener::{CoreListener, NoopCoreListener};
pub use dispatch::{DispatchQueue, DispatchQueues};
pub use imm_manager::{ImmManager, InstantMultimediaMessage};
pub use ims_module::ImsModule;
pub use registry::{RegisteredSession, RegistryStats, SessionRegistry};
pub use sharing_service::SharingService;
pub use sip_service::{invitation_session_kind, SipService};
