//! Services layer for the oidc-auth gateway.
//!
//! Login orchestration, invite codes, the state carrier and the seams to
//! storage and upstream identity providers.

mod clock;
mod database;
pub mod error;
pub mod invite_code;
pub mod login;
mod memory_store;
mod oidc_provider;
pub mod provider;
pub mod state_carrier;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use database::PgUserStore;
pub use error::ServiceError;
pub use invite_code::{CodeGenerator, InviteCodeService, RandomCodeGenerator};
pub use login::{DeviceStatusView, DeviceTokenView, LoginOrchestrator, LoginParams};
pub use memory_store::MemoryUserStore;
pub use oidc_provider::OidcProvider;
pub use provider::{
    MockAccount, MockProvider, OAuthProvider, ProviderError, ProviderRegistry, ProviderToken,
};
pub use state_carrier::{ParameterCarrier, StateCarrier};
pub use store::{StoreError, TokenHashField, UserField, UserStore};
