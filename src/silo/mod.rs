mod controller;
mod state;
pub use controller::*;
pub use state::*;
