//! 令牌-代理绑定分配服务
//!
//! 按成员权重把启用的凭据分配到代理池中的出站代理，支持严格/宽松两种准入、
//! 限时人工覆盖（读取时按当前时间判定是否过期）以及节点移除时的级联清理。

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
