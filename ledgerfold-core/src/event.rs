//! Domain event marker.
//!
//! `DomainEvent` is the lightweight trait every concrete event struct
//! implements. It carries no persistence concerns; a [`Payload`] is the
//! serialised form that travels through the event store.
//!
//! [`Payload`]: crate::message::Payload

/// Marker trait for events that can be written to and read from a stream.
///
/// Each event carries a unique [`Self::KIND`] identifier. The kind is stored
/// next to the serialised data so projections can pick out the events they
/// understand and skip the rest.
///
/// ```
/// use ledgerfold_core::event::DomainEvent;
///
/// struct AccountDeposited {
///     amount: u64,
/// }
///
/// impl DomainEvent for AccountDeposited {
///     const KIND: &'static str = "account_deposited";
/// }
/// ```
pub trait DomainEvent {
    const KIND: &'static str;
}

/// Extension trait for getting the event kind from an event instance.
///
/// Blanket-implemented for every [`DomainEvent`]; never implement it by hand.
pub trait EventKind {
    fn kind(&self) -> &'static str;
}

impl<T: DomainEvent> EventKind for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Opened;

    impl DomainEvent for Opened {
        const KIND: &'static str = "account_opened";
    }

    #[test]
    fn instance_kind_matches_constant() {
        assert_eq!(Opened.kind(), Opened::KIND);
    }
}
