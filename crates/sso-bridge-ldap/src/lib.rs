#![doc = include_str!("../README.md")]

pub mod directory;
pub mod filter;
pub mod provider;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

// Re-exports
pub use directory::{Directory, DirectoryEntry, Ldap3Directory};
pub use filter::{build_user_filter, escape_filter_value};
pub use provider::LdapProvider;

#[cfg(any(test, feature = "test-support"))]
pub use memory::InMemoryDirectory;
