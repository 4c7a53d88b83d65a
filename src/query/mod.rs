pub mod compare;
pub mod filter;
