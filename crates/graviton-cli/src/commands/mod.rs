pub mod baseami;
pub mod deployment;
pub mod instance;
pub mod volume;
