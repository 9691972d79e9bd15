//! # Adapters Layer
//!
//! Concrete implementations of the outbound ports.
//!
//! | Adapter              | Port(s)                                      | Feature            |
//! |----------------------|----------------------------------------------|--------------------|
//! | `InMemoryRegistry`   | `RegistryStore`                              | always             |
//! | `DirectoryRegistry`  | `RegistryStore`                              | `network`          |
//! | `TcpOverlay`         | `ProbeTransport`, `SessionTransport`         | `network`          |
//! | `AddressBook`        | `DiscoveryListener`                          | `network`          |
//! | `SimulatedTelemetry` | geolocation, bandwidth, latency sources      | always             |
//! | `TcpLatencyProbe`    | `LatencySource`                              | `network`          |
//! | `IpInfoGeolocation`  | `GeolocationSource`                          | `system-telemetry` |
//! | `HttpBandwidthProbe` | `BandwidthSource`                            | `system-telemetry` |
//! | `SystemTimeSource`   | `TimeSource`                                 | always             |
//! | `LoggingChatHandler` | `ChatHandler`                                | always             |

mod chat;
pub mod registry;
pub mod telemetry;
mod time;

#[cfg(feature = "network")]
pub mod overlay;

pub use chat::LoggingChatHandler;
pub use registry::InMemoryRegistry;
pub use telemetry::SimulatedTelemetry;
pub use time::SystemTimeSource;

#[cfg(feature = "network")]
pub use overlay::{AddressBook, OverlayListener, TcpOverlay};
#[cfg(feature = "network")]
pub use registry::DirectoryRegistry;
#[cfg(feature = "network")]
pub use telemetry::TcpLatencyProbe;
#[cfg(feature = "system-telemetry")]
pub use telemetry::{HttpBandwidthProbe, IpInfoGeolocation};
