pub mod caller;
pub mod result;
pub mod statement;
pub mod tool;
