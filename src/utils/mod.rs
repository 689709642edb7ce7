pub mod logging;
pub mod single_flight;

pub use single_flight::{FlightPermit, SingleFlight};
