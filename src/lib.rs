pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod mpr;
pub mod neighbor;
pub mod node;
pub mod packet;
pub mod repository;
pub mod routing;
pub mod scheduler;
pub mod sim;
pub mod time;
pub mod topology;

pub use config::OlsrConfig;
pub use error::OlsrError;
pub use event::Event;
pub use node::{OlsrNode, Outgoing};
pub use routing::RoutingTableEntry;
pub use time::Time;
