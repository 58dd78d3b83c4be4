//! Endpoint identifiers.
//!
//! One byte on the wire. Data-plane identifiers are slot indices, so they
//! are dense from zero up to the slot table capacity. The highest value is
//! reserved for control traffic.

/// Identifier of a logical endpoint within one multiplexer instance.
///
/// Widening this past one byte would make byte order part of the wire format.
pub type EndpointId = u8;

/// Reserved identifier for endpoint handshake frames.
pub const CONTROL_ID: EndpointId = EndpointId::MAX;

/// Upper bound on slot table capacity. Keeps every slot index below [`CONTROL_ID`].
pub const MAX_SLOTS: usize = CONTROL_ID as usize;

/// Returns true if `id` is the reserved control identifier.
pub fn is_control(id: EndpointId) -> bool {
    id == CONTROL_ID
}

/// Human-readable label for an identifier, for logs and CLI output.
pub fn endpoint_label(id: EndpointId) -> String {
    if is_control(id) {
        "CONTROL".to_string()
    } else {
        format!("ep{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_id_is_outside_slot_range() {
        assert!(CONTROL_ID as usize >= MAX_SLOTS);
        assert!(is_control(0xFF));
        assert!(!is_control(0));
    }

    #[test]
    fn labels() {
        assert_eq!(endpoint_label(CONTROL_ID), "CONTROL");
        assert_eq!(endpoint_label(3), "ep3");
    }
}
