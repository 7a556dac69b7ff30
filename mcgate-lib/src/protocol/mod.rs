//! Game protocol messages produced by the proxy itself.

pub mod chat;
pub mod kick;
pub mod status;

pub use chat::{ChatMessage, ClickEvent, Color};
pub use kick::{encode_disconnect, send_kick, KickContext};
pub use status::{serve_status, StatusPlayers, StatusResponse, StatusVersion};
