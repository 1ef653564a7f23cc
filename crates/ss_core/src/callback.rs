//! Reliable-ACK callback chains (§3 "Outbound buffer", §9 "Callback chains
//! on reliable").
//!
//! A grouped reliable packet can carry several unrelated payloads under one
//! sequence number; when the single ACK for that sequence arrives, every
//! payload's callback has to fire. Modelled as a trait object plus a `Vec`
//! chain rather than the source's linked list of typed callbacks, since Rust
//! doesn't need the indirection a GC'd linked list gives you there.

/// A one-shot observer of a reliable buffer's outcome.
///
/// Fired exactly once, either with `success = true` after the matching ACK
/// arrives, or `success = false` if the connection tears down (or the
/// buffer is otherwise abandoned) before that happens.
pub trait OnReliableResult: Send {
    /// Consumes this callback, reporting the outcome.
    fn invoke(self: Box<Self>, success: bool);
}

impl<F: FnOnce(bool) + Send> OnReliableResult for F {
    fn invoke(self: Box<Self>, success: bool) {
        (*self)(success);
    }
}

/// An ordered chain of callbacks attached to one outbound reliable buffer.
///
/// Coalescing N unsent payloads into one grouped reliable packet chains
/// their N callbacks here, so the packet's single ACK fires all of them in
/// the order they were coalesced.
#[derive(Default)]
pub struct CallbackChain {
    callbacks: Vec<Box<dyn OnReliableResult>>,
}

impl CallbackChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a callback to the end of the chain.
    pub fn push(&mut self, callback: Box<dyn OnReliableResult>) {
        self.callbacks.push(callback);
    }

    /// Whether no callbacks are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Moves every callback from `other` onto the end of this chain, e.g.
    /// when coalescing several unsent reliable payloads into one grouped
    /// reliable frame (§4.4 "Promotion").
    pub fn append(&mut self, mut other: Self) {
        self.callbacks.append(&mut other.callbacks);
    }

    /// Fires every callback, in attachment order, with the same outcome.
    pub fn fire(self, success: bool) {
        for callback in self.callbacks {
            callback.invoke(success);
        }
    }
}

impl std::fmt::Debug for CallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackChain")
            .field("len", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn fires_every_callback_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CallbackChain::new();
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            chain.push(Box::new(move |success: bool| {
                seen.lock().unwrap().push((i, success));
            }));
        }
        chain.fire(true);
        assert_eq!(vec![(0, true), (1, true), (2, true)], *seen.lock().unwrap());
    }

    #[test]
    fn empty_chain_fires_nothing() {
        let chain = CallbackChain::new();
        assert!(chain.is_empty());
        chain.fire(false);
    }

    #[test]
    fn grouped_ack_scenario_fires_both_payload_callbacks() {
        // Scenario 4: P1/P2 coalesced under one seq; the single ACK fires
        // C1 then C2 with success=true.
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CallbackChain::new();

        let order1 = Arc::clone(&order);
        chain.push(Box::new(move |success: bool| {
            assert!(success);
            order1.lock().unwrap().push("C1");
        }));
        let order2 = Arc::clone(&order);
        chain.push(Box::new(move |success: bool| {
            assert!(success);
            order2.lock().unwrap().push("C2");
        }));

        chain.fire(true);
        assert_eq!(vec!["C1", "C2"], *order.lock().unwrap());
    }
}
