use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 代理节点
///
/// 由导入与健康探测模块维护，本服务只读取；禁用或不可达的节点不提供容量。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProxyEndpoint {
    /// 节点ID
    pub id: i64,
    /// 协议(http/https/socks5)
    pub scheme: String,
    /// 主机
    pub host: String,
    /// 端口
    pub port: i64,
    /// 认证用户名
    pub username: String,
    /// 是否启用
    pub enabled: bool,
    /// 最近一次探测是否可达
    pub reachable: bool,
}

impl ProxyEndpoint {
    /// 是否可以承载绑定
    pub fn is_available(&self) -> bool {
        self.enabled && self.reachable
    }
}

/// 对外展示的节点连接信息(不含密码)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EndpointSummary {
    pub id: i64,
    pub scheme: String,
    pub host: String,
    pub port: i64,
    pub username: String,
}

impl From<ProxyEndpoint> for EndpointSummary {
    fn from(endpoint: ProxyEndpoint) -> Self {
        Self {
            id: endpoint.id,
            scheme: endpoint.scheme,
            host: endpoint.host,
            port: endpoint.port,
            username: endpoint.username,
        }
    }
}
