//! AKAI Booking - omakase 预订与订金后端
//!
//! # 架构概述
//!
//! 座位按 (服务日期, 时段) 严格限量；订金通过 Stripe Checkout 异步支付，
//! 支付结果经 webhook 对账后才确认预订。核心是预订并发引擎：
//!
//! - **容量账本** (`db::slots`): 每时段 held/confirmed 计数，条件更新保证不超卖
//! - **预订状态机** (`db::reservations`): PENDING_PAYMENT → CONFIRMED / EXPIRED / ...
//! - **幂等保护** (`db::idempotency`): Idempotency-Key 去重，至多一次下单
//! - **支付对账** (`api::payment_webhook`): 签名校验 + 事件去重 + 状态驱动
//! - **过期清扫** (`jobs::expire_holds`): 定时回收超时占座
//!
//! # 模块结构
//!
//! ```text
//! src/
//! ├── config.rs      # 环境变量配置
//! ├── state.rs       # 共享应用状态
//! ├── error.rs       # 统一错误类型
//! ├── db/            # SQLite 仓储层
//! ├── api/           # HTTP 路由和处理器
//! ├── stripe/        # Stripe REST 集成
//! ├── jobs/          # 后台定时任务
//! ├── rate_limit.rs  # 应用层限流
//! └── tasks.rs       # 后台任务管理
//! ```

pub mod api;
pub mod config;
pub mod dates;
pub mod db;
pub mod error;
pub mod jobs;
pub mod rate_limit;
pub mod state;
pub mod stripe;
pub mod tasks;
pub mod util;

// Re-export 公共类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;
pub use tasks::{BackgroundTasks, TaskKind};
