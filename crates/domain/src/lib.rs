//! 实时聊天核心领域模型
//!
//! 包含标识类型、聊天事件、WebSocket 线路格式以及推送通知模型。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
