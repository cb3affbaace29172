pub mod binding_registry;
pub mod capacity;
pub mod cleanup;
pub mod clock;
pub mod membership;
pub mod override_store;
pub mod planner;
pub mod recompute;
pub mod routing;

pub use binding_registry::{BindingRegistry, BindingView, MembershipChange, PoolSummary};
pub use capacity::CapacityModel;
pub use cleanup::{CleanupOptions, CleanupOutcome, EndpointCleanup};
pub use clock::{Clock, SystemClock};
pub use membership::MembershipWriter;
pub use override_store::{effective, OverrideOutcome, OverrideStore};
pub use planner::{plan_allocation, AllocationPlan, CapacityDiagnostics};
pub use recompute::{PoolLocks, RecomputeCoordinator, RecomputeOutcome, RecomputeParams};
pub use routing::{RouteResolution, RouteResolver};
