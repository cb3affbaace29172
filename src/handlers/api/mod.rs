pub mod bindings;
pub mod endpoints;
pub mod pools;
pub mod response;

pub use bindings::{
    clear_override, list_bindings, ClearOverrideResponse, recompute_bindings, set_override, ListBindingsQuery,
    ListBindingsResponse, RecomputeRequest, SetOverrideRequest,
};
pub use endpoints::{remove_endpoint, RemoveEndpointRequest};
pub use pools::{replace_pool_endpoints, resolve_route, ReplaceEndpointsRequest, ReplaceEndpointsResponse};
pub use response::{ErrorResponse, RequestId};
