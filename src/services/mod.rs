//! Services module - Server-facing business logic.
//!
//! Everything the scheduler and the CLI act on lives here. The services have no
//! knowledge of the control loop; each one takes its inputs explicitly, which
//! keeps them testable against fakes, temporary directories and in-memory I/O.
//!
//! # Components
//!
//! - [`RconClient`]: remote console session over TCP. Handles:
//!   - Binary packet framing with partial-read reassembly
//!   - Authentication with the shared secret
//!   - One reconnect-and-retry per command
//!   - Player listing and moderation command formatting
//!
//! - [`MetadataCache`]: Steam Workshop metadata with a 24 hour freshness window,
//!   persisted as JSON. Also computes the remote dependency closure.
//!
//! - [`ModGraph`]: the local `mod.info` requirement graph and the
//!   dependency-first load-order sort.
//!
//! - [`UpdateChecker`]: compares installed workshop timestamps with the live
//!   catalog.
//!
//! - [`SystemdService`] / [`CommandBackup`]: the service manager and backup
//!   collaborators driven by the restart sequence.
//!
//! - [`cleanup_reset_zones`]: removes the save files of reset map cells.
//!
//! # Usage Example
//!
//! ```ignore
//! use pzkeeper::services::RconClient;
//!
//! let mut rcon = RconClient::from_config(&config);
//! if rcon.connect().await {
//!     rcon.broadcast("Server restarting in 5 minutes").await;
//!     let players = rcon.list_players().await;
//! }
//! ```

pub mod load_order;
pub mod map_cleanup;
pub mod rcon;
pub mod server_ini;
pub mod system;
pub mod update_checker;
pub mod workshop;

pub use load_order::{LoadOrderChange, ModGraph, diff_load_order, parse_mod_info};
pub use map_cleanup::{CleanupOutcome, cleanup_reset_zones};
pub use rcon::{Player, RconClient, RconError, RemoteConsole, SessionState};
pub use server_ini::ServerIni;
pub use system::{
    BackupError, BackupRunner, CommandBackup, ServiceControl, ServiceError, SystemdService,
};
pub use update_checker::{UpdateChecker, find_updates, parse_manifest};
pub use workshop::{
    MetadataCache, SteamWorkshopApi, WorkshopApi, WorkshopDetails, WorkshopError, merge_resolved,
};
