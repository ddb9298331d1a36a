pub mod device;
pub mod invite_code;
pub mod user;

pub use device::{
    Device, DeviceStatus, Fingerprint, Platform, TOKEN_PROVIDER_CUSTOM, TOKEN_PROVIDER_GATEWAY,
};
pub use invite_code::{InviteCode, InviteCodeUsage};
pub use user::AuthUser;
