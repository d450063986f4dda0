pub mod system_call;
