pub mod derivation;
pub mod signatures;
