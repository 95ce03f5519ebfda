pub mod bootstrap;
pub mod worker;
