pub mod auth;
pub mod controller;
pub mod directory;
pub mod error;
pub mod membership;
pub mod password;

pub use auth::{AuthError, Authenticator, StaticTokens};
pub use controller::{Admission, CreateSession, LifecycleConfig, LifecycleController, SessionSummary};
pub use directory::SessionDirectory;
pub use error::LifecycleError;
pub use membership::{InMemoryMembership, MembershipStore};
