pub mod states;
pub mod params;
pub mod engine;
pub mod forces;
pub mod integrator;
pub mod barostat;
pub mod scenario;
pub mod driver;
pub mod units;
