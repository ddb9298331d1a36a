pub mod invite;
pub mod login;
