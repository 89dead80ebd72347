//! Cross-task coordination

pub mod device_lock;
