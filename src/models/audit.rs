use serde::Serialize;

/// 审计记录，附带请求的关联ID
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// 动作，如 binding.override.set
    pub action: &'static str,
    /// 资源类型
    pub resource: &'static str,
    /// 资源ID
    pub record_id: Option<String>,
    /// 请求关联ID
    pub request_id: Option<String>,
    /// 详情
    pub detail: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action: &'static str, resource: &'static str, record_id: impl ToString) -> Self {
        Self {
            action,
            resource,
            record_id: Some(record_id.to_string()),
            request_id: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        self.request_id = request_id.map(str::to_string);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
