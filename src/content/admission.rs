//! All-or-nothing admission: decide whether the transport can start every
//! fetch of a composite unit at once, before anything is reserved. Partially
//! scheduling and then failing the remainder would leak reserved capacity,
//! so this must stay a pure query.

use crate::content::descriptor::EndpointKey;
use crate::transport::scheduler::AdmissionGate;
use std::collections::HashMap;

/// Returns true when the gate can accept every required request: one slot
/// per listed endpoint occurrence (duplicates allowed) plus the global
/// total. Performs no reservations.
pub fn can_schedule_all(gate: &dyn AdmissionGate, endpoints: &[EndpointKey]) -> bool {
    if endpoints.is_empty() {
        return true;
    }

    let mut required: HashMap<&EndpointKey, usize> = HashMap::new();
    for endpoint in endpoints {
        *required.entry(endpoint).or_insert(0) += 1;
    }

    for (endpoint, count) in required {
        if !gate.endpoint_has_capacity(endpoint, count) {
            return false;
        }
    }

    gate.global_has_capacity(endpoints.len())
}
