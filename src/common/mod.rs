pub mod lifetime;
pub mod random;
pub mod response;
pub mod security;
pub mod upload;
