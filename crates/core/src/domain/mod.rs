pub mod artifact;
pub mod role;
pub mod session;
pub mod transcript;
