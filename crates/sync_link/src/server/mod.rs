//! TCP plumbing for both ends of the link.
//!
//! The Game process runs [`serve_game_link`]; the AI process runs
//! [`run_uplink`]. Both drive each connection with
//! [`handlers::drive_connection`].

pub mod connector;
pub mod handlers;
pub mod listener;

pub use connector::run_uplink;
pub use handlers::{drive_connection, LinkHandler};
pub use listener::serve_game_link;
