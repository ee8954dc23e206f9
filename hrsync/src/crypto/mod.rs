//! Cryptography for the token vault. Secret encryption and key fingerprinting
//! live in separate submodules so the key material only ever flows through
//! `secrets`.

pub mod integrity;
pub mod secrets;
