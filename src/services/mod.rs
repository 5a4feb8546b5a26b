pub mod cloudflare;
pub mod git;
pub mod normalizer;
pub mod session;
pub mod telegram;
