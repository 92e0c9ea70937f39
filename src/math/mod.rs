pub mod resample;
pub mod solar;


pub use resample::*;
pub use solar::*;
