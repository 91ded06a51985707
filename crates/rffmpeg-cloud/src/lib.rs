//! rffmpeg-cloud: turning scaling decisions into cloud workers.
//!
//! [`CloudProvider`] is the capability set the autoscaler needs from a
//! cloud: list servers, resolve named resources, create, look up, and
//! delete. [`HetznerCloud`] implements it over the Hetzner Cloud REST API.
//!
//! [`LifecycleManager`] drives the provisioning protocol on top of any
//! provider:
//!
//! ```text
//! create_worker
//!   1. generate_name      draw "rffmpeg-worker-<uuid>" until it collides with no live server
//!   2. resolve resources  server type, image, ssh key, location, network, firewall, placement group
//!   3. create_server      with the rendered cloud-init user data
//!   4. wait_until_running poll every poll_interval, bounded by provision_timeout
//!   5. private address    first private network IP
//!   6. register           upsert the Host row
//!
//! delete_worker
//!   1. server_by_name → 2. delete_server → 3. remove the Host row
//! ```
//!
//! Nothing is compensated: a registration failure after step 3 leaves an
//! unregistered server, and a store failure after a successful delete
//! leaves a stale row. Both are logged for an operator to reconcile.

pub mod error;
pub mod hetzner;
pub mod lifecycle;
pub mod provider;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::{CloudError, CloudResult};
pub use hetzner::HetznerCloud;
pub use lifecycle::{
    LifecycleManager, ProvisionSettings, WORKER_NAME_PREFIX, WorkerLifecycle, generate_name,
    generate_name_with,
};
pub use provider::*;
