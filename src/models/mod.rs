// 导出所有模型组件

pub mod audit;
pub mod binding;
pub mod credential;
pub mod pool_membership;
pub mod proxy_endpoint;
pub mod proxy_pool;

// 重新导出核心类型
pub use audit::AuditEntry;
pub use binding::{Binding, EffectiveAssignment, EffectiveMode};
pub use credential::CredentialRef;
pub use pool_membership::{ActiveMembership, MembershipInput};
pub use proxy_endpoint::{EndpointSummary, ProxyEndpoint};
pub use proxy_pool::PoolRef;
