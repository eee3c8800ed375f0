//! Proptest generators for property-based testing.

use proptest::prelude::*;

use redwood_core::{Keypair, Keypath, PeerAddressBook, StateUri, Tx, TxId};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a transaction id.
pub fn tx_id() -> impl Strategy<Value = TxId> {
    "[0-9a-f]{8,32}".prop_map(TxId::from)
}

/// Generate a state URI such as `example.com/chat`.
pub fn state_uri() -> impl Strategy<Value = StateUri> {
    "[a-z]{1,8}\\.[a-z]{2,4}/[a-z]{1,8}".prop_map(StateUri::from)
}

/// Generate a keypath of up to three segments.
pub fn keypath() -> impl Strategy<Value = Keypath> {
    prop::collection::vec("[a-z]{1,6}", 0..4).prop_map(|segments| {
        Keypath::new(format!("/{}", segments.join("/")))
    })
}

/// Generate one patch line.
pub fn patch() -> impl Strategy<Value = String> {
    "\\.[a-z]{1,6} = [0-9]{1,4}"
}

/// Generate an unsigned transaction, sometimes with an attachment.
pub fn tx() -> impl Strategy<Value = Tx> {
    (
        tx_id(),
        state_uri(),
        prop::collection::vec(tx_id(), 0..3),
        prop::collection::vec(patch(), 0..4),
        prop::option::of(prop::collection::vec(any::<u8>(), 1..64)),
    )
        .prop_map(|(id, state_uri, parents, patches, attachment)| {
            let tx = Tx::new(state_uri, parents, patches).with_id(id);
            match attachment {
                Some(bytes) => tx.with_attachment(bytes),
                None => tx,
            }
        })
}

/// Generate one well-formed `(transport, address)` discovery entry.
pub fn peer_entry() -> impl Strategy<Value = (String, String)> {
    ("[a-z][a-z0-9]{0,7}", "[a-z0-9.:/]{1,20}")
}

/// Generate a peer address book.
pub fn peer_book() -> impl Strategy<Value = PeerAddressBook> {
    prop::collection::vec(peer_entry(), 0..8).prop_map(|entries| entries.into_iter().collect())
}

/// Generate a discovery entry the parser must skip.
pub fn malformed_peer_entry() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,5}",
        "[a-z]{1,5}=[a-z]{1,5}",
        "=\"[a-z]{1,5}\"",
        "[a-z]{1,5}=\"\"",
    ]
}
