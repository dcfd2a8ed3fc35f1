//! Client for the GeoQuest location-game RPC protocol.
//!
//! The crate authenticates a player against a third-party identity
//! provider, establishes a signed session with the game backend, and
//! issues structured requests (player profile, inventory, nearby-map
//! queries) over a proprietary binary envelope format. Decoded responses
//! are optionally fanned out to observers through a bounded [`feed`].
//!
//! Typical use:
//!
//! ```no_run
//! use geoquest::auth;
//! use geoquest::feed::VoidFeed;
//! use geoquest::sign::NullCrypto;
//! use geoquest::{Location, Session};
//!
//! # async fn run() -> Result<(), geoquest::Error> {
//! let provider = auth::new_provider("ptc", "ash", "hunter2")?;
//! let location = Location::new(59.3293, 18.0686, 8.0);
//! let mut session = Session::new(provider, location, Box::new(VoidFeed), Box::new(NullCrypto));
//!
//! session.init().await?;
//! let (player, _status) = session.get_player().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cell;
pub mod error;
pub mod feed;
pub mod location;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod sign;

pub use error::{Error, StatusError, TransportError};
pub use location::Location;
pub use session::Session;
