pub mod defs;
pub mod idt;
pub mod pic;
pub mod stubs;
pub mod system_call;
