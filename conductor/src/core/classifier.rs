//! Route selection rules applied on top of the classifier agent's answer.

use crate::core::types::Route;

/// Degrade a `context` route to `plan` once the context budget for the turn is spent.
///
/// `context_retry_count` counts completed collection rounds in the current turn.
pub fn enforce_route_cap(route: Route, context_retry_count: u32, max_context_rounds: u32) -> Route {
    if route == Route::Context && context_retry_count >= max_context_rounds {
        Route::Plan
    } else {
        route
    }
}
