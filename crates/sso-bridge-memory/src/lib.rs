// sso-bridge-memory: in-memory datastore and identity store for sso-bridge.
//
// HashMap-backed implementations of `Adapter` and `IdentityStore` with the same
// unique-constraint behaviour a relational backend provides. Used by tests and
// by hosts that do not need persistence.

pub mod adapter;
pub mod identity;

pub use adapter::MemoryAdapter;
pub use identity::MemoryIdentityStore;
