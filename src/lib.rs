pub mod directory;
pub mod error;
pub mod expression;
pub mod filter;
pub mod resolve;
pub mod tabular;
pub mod value;
