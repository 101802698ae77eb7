//! BK-0010/0011M system core: the address-space router, host API, and a reference runner thread
//! built around the `vm1-emu` CPU

pub mod bus;
pub mod computer;
pub mod device;
pub mod memory;
pub mod runner;
mod serialize;

pub use bk_config::{BkConfig, BkModel};
pub use computer::Computer;
pub use serialize::SaveStateError;
