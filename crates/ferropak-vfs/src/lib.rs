//! Mount layer for pak containers.
//!
//! A [`FileProvider`] owns a set of containers, mounts them as their keys
//! become available and resolves every path to the container with the
//! highest read order.
//!
//! ```no_run
//! use ferropak_vfs::{FileProvider, ProviderConfig};
//!
//! let mut provider = FileProvider::new(ProviderConfig::default());
//! provider.register_directory("Game/Content/Paks")?;
//! provider.mount_all();
//!
//! for guid in provider.required_keys() {
//!     println!("missing key {guid}");
//! }
//! let ini = provider.extract("Game/Config/DefaultGame.ini")?;
//! # Ok::<(), ferropak_vfs::Error>(())
//! ```

mod error;
mod keys;
mod provider;

pub use error::{Error, Result};
pub use keys::KeyRegistry;
pub use provider::{read_order_from_name, FileProvider, ProviderConfig, PATCH_READ_ORDER};
